//! Freshness contracts for cache reads.
//!
//! Callers state how much staleness they tolerate; reads come back wrapped
//! in [`CacheRead`] so the caller can see whether the value was served from
//! cache and how old it is.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Freshness requirement for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve cached data younger than `max_staleness`; refetch otherwise.
    BestEffort {
        /// Maximum acceptable age of cached data.
        max_staleness: Duration,
    },

    /// Always go to the backend, joining a fetch already in flight.
    Consistent,
}

impl Freshness {
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    pub fn consistent() -> Self {
        Self::Consistent
    }

    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::BestEffort { .. })
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Max staleness for BestEffort, zero for Consistent.
    pub fn max_staleness(&self) -> Duration {
        match self {
            Self::BestEffort { max_staleness } => *max_staleness,
            Self::Consistent => Duration::ZERO,
        }
    }
}

/// Result of a read, carrying staleness metadata.
///
/// The value is shared: every reader coalesced onto one fetch receives the
/// same `Arc`.
#[derive(Debug)]
pub struct CacheRead<T> {
    value: Arc<T>,
    fetched_at: Instant,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    pub fn from_cache(value: Arc<T>, fetched_at: Instant) -> Self {
        Self {
            value,
            fetched_at,
            was_cache_hit: true,
        }
    }

    pub fn from_fetch(value: Arc<T>, fetched_at: Instant) -> Self {
        Self {
            value,
            fetched_at,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> Arc<T> {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn shared(&self) -> &Arc<T> {
        &self.value
    }

    /// How long ago the value was fetched from the backend.
    pub fn staleness(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }
}

impl<T> Clone for CacheRead<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
