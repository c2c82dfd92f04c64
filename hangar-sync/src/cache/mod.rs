//! Cache layer with explicit staleness.
//!
//! The [`CacheStore`] holds one [`CacheEntry`] per [`QueryKey`](hangar_core::QueryKey)
//! and fans changes out to subscribers. Reads state their staleness
//! tolerance via [`Freshness`] and get back a [`CacheRead<T>`] that says
//! whether the value came from cache and how old it is.
//!
//! # Example
//!
//! ```ignore
//! // Serve anything younger than a minute
//! let read = queries
//!     .read::<Page<Client>, _, _>(&key, Freshness::best_effort(Duration::from_secs(60)), fetch)
//!     .await?;
//!
//! if read.was_cache_hit() && read.staleness() > Duration::from_secs(30) {
//!     tracing::debug!("serving half-minute-old client list");
//! }
//! ```

pub mod freshness;
pub mod stats;
pub mod store;

pub use freshness::{CacheRead, Freshness};
pub use stats::{StatsSnapshot, SyncStats};
pub use store::{
    CacheEntry, CacheEvent, CacheStore, CachedValue, Callback, QueryStatus, RequestId,
    Subscription,
};
