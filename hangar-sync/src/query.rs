//! Query executor: cached, coalesced, retried reads.
//!
//! A read is served from the [`CacheStore`] when the entry satisfies the
//! caller's [`Freshness`]. Otherwise it joins the fetch already in flight
//! for that key or starts one. Fetches run as detached tasks so a reader
//! going away never cancels a fetch other readers (or the cache) still
//! want.

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use hangar_core::{
    HangarError, HangarResult, QueryKey, RetryDecision, RetryPolicy, RetrySchedule,
    TransportError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{
    CacheRead, CacheStore, CachedValue, Freshness, QueryStatus, RequestId, SyncStats,
};

type FetchOutcome = Result<(CachedValue, Instant), HangarError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct InFlight {
    request: RequestId,
    future: SharedFetch,
}

enum Dispatch {
    /// Another fetch landed between the fast path and taking the lock.
    Cached(CachedValue, Instant),
    Joined(SharedFetch),
    Started(SharedFetch),
}

/// Resolves reads against the cache store.
#[derive(Clone)]
pub struct QueryExecutor {
    store: CacheStore,
    retry: RetryPolicy,
    stale_after: Duration,
    in_flight: Arc<DashMap<QueryKey, InFlight>>,
    stats: Arc<SyncStats>,
}

impl QueryExecutor {
    /// `stale_after` is recorded on entries created by consistent reads.
    pub fn new(
        store: CacheStore,
        retry: RetryPolicy,
        stale_after: Duration,
        stats: Arc<SyncStats>,
    ) -> Self {
        Self {
            store,
            retry,
            stale_after,
            in_flight: Arc::new(DashMap::new()),
            stats,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Cached data for `key`, whatever its status, without any fetch.
    pub fn peek<T>(&self, key: &QueryKey) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.store.get(key)?.data_as::<T>()
    }

    /// Number of keys with a fetch readers can currently join.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Read `key`, fetching with `fetcher` when the cache cannot answer.
    ///
    /// `fetcher` is called once per attempt; transient failures are retried
    /// under the executor's [`RetryPolicy`]. Concurrent reads of the same
    /// key share one fetch and receive the same `Arc`.
    pub async fn read<T, F, Fut>(
        &self,
        key: &QueryKey,
        freshness: Freshness,
        fetcher: F,
    ) -> HangarResult<CacheRead<T>>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        let now = Instant::now();
        if let Freshness::BestEffort { max_staleness } = freshness {
            if let Some(entry) = self
                .store
                .get(key)
                .filter(|entry| entry.is_fresh(now, max_staleness))
            {
                let value = entry.data_as::<T>().ok_or_else(|| type_mismatch(key))?;
                self.store.touch(key);
                self.stats.record_hit();
                debug!(key = %key, "cache hit");
                return Ok(CacheRead::from_cache(
                    value,
                    entry.fetched_at.unwrap_or(now),
                ));
            }
        }

        let fetch = match self.dispatch(key, freshness, fetcher) {
            Dispatch::Cached(value, fetched_at) => {
                let value = value.downcast::<T>().map_err(|_| type_mismatch(key))?;
                self.stats.record_hit();
                debug!(key = %key, "cache hit after lock");
                return Ok(CacheRead::from_cache(value, fetched_at));
            }
            Dispatch::Joined(fetch) => {
                self.stats.record_miss();
                self.stats.record_coalesced();
                debug!(key = %key, "joined in-flight fetch");
                fetch
            }
            Dispatch::Started(fetch) => {
                self.stats.record_miss();
                fetch
            }
        };

        let (value, fetched_at) = fetch.await?;
        let value = value.downcast::<T>().map_err(|_| type_mismatch(key))?;
        Ok(CacheRead::from_fetch(value, fetched_at))
    }

    /// Serve a fresh entry, join the fetch in flight for `key` or start a
    /// new one.
    ///
    /// Freshness is checked again and the `Loading` transition happens under
    /// the store's lock for `key`, so two readers can never both start a
    /// fetch and a reader that lost the race to a landing fetch reuses it.
    fn dispatch<T, F, Fut>(&self, key: &QueryKey, freshness: Freshness, fetcher: F) -> Dispatch
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        let stale_after = match freshness {
            Freshness::BestEffort { max_staleness } => max_staleness,
            Freshness::Consistent => self.stale_after,
        };
        self.store.modify(key, stale_after, |entry| {
            if let Freshness::BestEffort { max_staleness } = freshness {
                let now = Instant::now();
                if entry.is_fresh(now, max_staleness) {
                    if let Some(data) = entry.data.clone() {
                        let fetched_at = entry.fetched_at.unwrap_or(now);
                        return (false, Dispatch::Cached(data, fetched_at));
                    }
                }
            }

            if let Some(current) = entry.in_flight {
                if let Some(slot) = self.in_flight.get(key) {
                    if slot.request == current {
                        return (false, Dispatch::Joined(slot.future.clone()));
                    }
                }
            }

            let request = self.store.next_request_id();
            entry.status = QueryStatus::Loading;
            entry.in_flight = Some(request);
            entry.stale_after = stale_after;

            let future = self.spawn_fetch(key.clone(), request, fetcher);
            self.in_flight.insert(
                key.clone(),
                InFlight {
                    request,
                    future: future.clone(),
                },
            );
            debug!(key = %key, request, "fetch started");
            (true, Dispatch::Started(future))
        })
    }

    fn spawn_fetch<T, F, Fut>(&self, key: QueryKey, request: RequestId, fetcher: F) -> SharedFetch
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        let task = FetchTask {
            store: self.store.clone(),
            in_flight: Arc::clone(&self.in_flight),
            stats: Arc::clone(&self.stats),
            key,
            request,
        };
        let schedule = self.retry.schedule();
        let handle = tokio::spawn(task.clone().run(schedule, fetcher));

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let error = HangarError::FetchAborted {
                        key: task.key.to_string(),
                        reason: join_error.to_string(),
                    };
                    task.fail(error.clone());
                    Err(error)
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("store", &self.store)
            .field("retry", &self.retry)
            .field("stale_after", &self.stale_after)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// State a detached fetch needs to report back into the cache.
#[derive(Clone)]
struct FetchTask {
    store: CacheStore,
    in_flight: Arc<DashMap<QueryKey, InFlight>>,
    stats: Arc<SyncStats>,
    key: QueryKey,
    request: RequestId,
}

impl FetchTask {
    async fn run<T, F, Fut>(self, mut schedule: RetrySchedule, fetcher: F) -> FetchOutcome
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        loop {
            self.stats.record_fetch();
            match fetcher().await {
                Ok(value) => {
                    let value: CachedValue = Arc::new(value);
                    let fetched_at = Instant::now();
                    if !self.succeed(Arc::clone(&value), fetched_at) {
                        debug!(key = %self.key, request = self.request, "discarded superseded response");
                    }
                    return Ok((value, fetched_at));
                }
                Err(error) => match schedule.on_failure(&error) {
                    RetryDecision::Retry { attempt, delay } => {
                        self.stats.record_retry();
                        warn!(
                            key = %self.key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "transient fetch failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        self.stats.record_failure();
                        warn!(
                            key = %self.key,
                            attempts = schedule.attempts(),
                            error = %error,
                            "fetch failed"
                        );
                        let error = HangarError::from(error);
                        self.fail(error.clone());
                        return Err(error);
                    }
                },
            }
        }
    }

    /// Write a successful response. Returns false when it was discarded.
    fn succeed(&self, value: CachedValue, fetched_at: Instant) -> bool {
        let request = self.request;
        let applied = self
            .store
            .update_existing(&self.key, |entry| {
                if request < entry.epoch || entry.applied_request.is_some_and(|a| a > request) {
                    return (false, false);
                }
                entry.data = Some(value);
                entry.fetched_at = Some(fetched_at);
                entry.applied_request = Some(request);
                entry.last_error = None;
                if entry.in_flight == Some(request) {
                    entry.in_flight = None;
                }
                entry.status = if entry.in_flight.is_some() {
                    QueryStatus::Loading
                } else if request >= entry.fresh_from {
                    QueryStatus::Success
                } else {
                    QueryStatus::Idle
                };
                (true, true)
            })
            .unwrap_or(false);
        self.release();
        applied
    }

    fn fail(&self, error: HangarError) {
        let request = self.request;
        self.store.update_existing(&self.key, |entry| {
            if request < entry.epoch || entry.applied_request.is_some_and(|a| a > request) {
                return (false, ());
            }
            match entry.in_flight {
                Some(current) if current != request => (false, ()),
                _ => {
                    entry.in_flight = None;
                    entry.status = QueryStatus::Error;
                    entry.last_error = Some(error);
                    (true, ())
                }
            }
        });
        self.release();
    }

    fn release(&self) {
        let request = self.request;
        self.in_flight
            .remove_if(&self.key, |_, slot| slot.request == request);
    }
}

fn type_mismatch(key: &QueryKey) -> HangarError {
    HangarError::TypeMismatch {
        key: key.to_string(),
    }
}
