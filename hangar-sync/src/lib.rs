//! Hangar Sync - cache store, query and mutation executors
//!
//! Everything hangs off a [`SyncEngine`]: one in-memory [`CacheStore`],
//! a [`QueryExecutor`] that serves and coalesces reads against it and a
//! [`MutationExecutor`] that invalidates it after successful writes.
//! [`DebouncedTrigger`] turns noisy input into settled query terms.

pub mod cache;
pub mod debounce;
pub mod engine;
pub mod mutation;
pub mod notify;
pub mod query;

pub use cache::{
    CacheEntry, CacheEvent, CacheRead, CacheStore, CachedValue, Freshness, QueryStatus,
    RequestId, StatsSnapshot, Subscription, SyncStats,
};
pub use debounce::{DebouncePhase, DebouncedTrigger, Debouncer};
pub use engine::SyncEngine;
pub use mutation::{invalidations_for, Invalidation, MutationExecutor, MutationKind, MutationRequest};
pub use notify::{ChannelSink, Notification, NotificationSink, Outcome, TracingSink};
pub use query::QueryExecutor;
