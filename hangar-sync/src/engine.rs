//! The owned synchronization engine.

use hangar_core::{KeyPrefix, RetryPolicy, SyncConfig};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheStore, StatsSnapshot, SyncStats};
use crate::debounce::DebouncedTrigger;
use crate::mutation::MutationExecutor;
use crate::notify::{NotificationSink, TracingSink};
use crate::query::QueryExecutor;

/// Cache store plus the executors that operate on it.
///
/// Clones share state. Resource clients built from the same engine see
/// each other's cached reads and invalidations.
#[derive(Clone, Debug)]
pub struct SyncEngine {
    store: CacheStore,
    queries: QueryExecutor,
    mutations: MutationExecutor,
    config: Arc<SyncConfig>,
    stats: Arc<SyncStats>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, sink: Arc<dyn NotificationSink>) -> Self {
        let store = CacheStore::new();
        let stats = Arc::new(SyncStats::default());
        let queries = QueryExecutor::new(
            store.clone(),
            RetryPolicy::new(&config.retry),
            config.stale_after(),
            Arc::clone(&stats),
        );
        let mutations = MutationExecutor::new(store.clone(), sink, Arc::clone(&stats));
        Self {
            store,
            queries,
            mutations,
            config: Arc::new(config),
            stats,
        }
    }

    /// Default configuration, outcomes logged through tracing.
    pub fn with_defaults() -> Self {
        Self::new(SyncConfig::default(), Arc::new(TracingSink))
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn queries(&self) -> &QueryExecutor {
        &self.queries
    }

    pub fn mutations(&self) -> &MutationExecutor {
        &self.mutations
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Mark every entry under `prefix` stale. Returns how many were marked.
    pub fn invalidate(&self, prefix: &KeyPrefix) -> usize {
        self.store.mark_stale(prefix)
    }

    /// Drop cache entries left unused for the configured gc window.
    pub fn collect_garbage(&self) -> usize {
        let removed = self.store.collect_garbage(self.config.gc_after());
        if removed > 0 {
            self.stats.record_evictions(removed);
            debug!(removed, remaining = self.store.len(), "collected idle cache entries");
        }
        removed
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// A debounced trigger using the configured quiet period.
    pub fn debounced<V>(&self) -> DebouncedTrigger<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        DebouncedTrigger::spawn(self.config.debounce.quiet_period())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Freshness;
    use hangar_core::{QueryKey, TransportError};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_cache() {
        let engine = SyncEngine::with_defaults();
        let other = engine.clone();
        let key = QueryKey::detail("clients", "1").unwrap();
        let fresh = Freshness::best_effort(engine.config().stale_after());

        engine
            .queries()
            .read(&key, fresh, || async { Ok::<_, TransportError>(5u32) })
            .await
            .unwrap();
        let read = other
            .queries()
            .read(&key, fresh, || async { Ok::<_, TransportError>(6u32) })
            .await
            .unwrap();

        assert_eq!(*read.value(), 5);
        let stats = engine.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fetches, 1);

        assert_eq!(other.invalidate(&KeyPrefix::namespace("clients")), 1);
        assert!(engine.queries().peek::<u32>(&key).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_garbage_uses_gc_window() {
        let config = SyncConfig::default().with_gc_after(Duration::from_secs(120));
        let engine = SyncEngine::new(config, Arc::new(TracingSink));
        let fresh = Freshness::best_effort(engine.config().stale_after());
        for term in ["j", "jo", "joa"] {
            let key = QueryKey::list("clients", &[("search", term)]).unwrap();
            engine
                .queries()
                .read(&key, fresh, || async { Ok::<_, TransportError>(0u8) })
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(engine.collect_garbage(), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(engine.collect_garbage(), 3);
        assert!(engine.store().is_empty());
        assert_eq!(engine.stats().evictions, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_uses_config() {
        let config = SyncConfig::default().with_quiet_period(Duration::from_millis(100));
        let engine = SyncEngine::new(config, Arc::new(TracingSink));
        let mut trigger = engine.debounced::<&'static str>();
        trigger.input("a");
        let start = tokio::time::Instant::now();
        assert_eq!(trigger.settled().await, Some("a"));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(300));
    }
}
