//! Hangar Core - shared types for the resource synchronization layer
//!
//! Query keys, the entity registry, the error taxonomy and the retry policy.
//! No I/O and no async; every other Hangar crate depends on this one.

pub mod config;
pub mod entity;
pub mod error;
pub mod key;
pub mod retry;

pub use config::{DebounceConfig, RetryConfig, SyncConfig};
pub use entity::{EntityKind, EntitySpec};
pub use error::{ConfigError, FieldError, HangarError, HangarResult, KeyError, TransportError};
pub use key::{canonical_params, normalize_namespace, KeyPrefix, QueryKey, QueryKind};
pub use retry::{ErrorClass, RetryDecision, RetryPolicy, RetrySchedule};
