//! Process-wide cache store.
//!
//! A keyed map from [`QueryKey`] to [`CacheEntry`] plus the subscriber lists
//! for each key. The store holds state only; fetching and invalidation
//! policy live in the executors.
//!
//! Every mutation replaces the affected entry as one step and then hands
//! each subscriber a complete snapshot of the new entry. Callbacks run
//! after the map shard lock is released, so a callback may read the store.

use dashmap::DashMap;
use hangar_core::{HangarError, KeyPrefix, QueryKey};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Type-erased cached payload. Readers downcast to the type they expect.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Identifier of one network fetch. Monotonic per store.
pub type RequestId = u64;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Never fetched, or invalidated since the last fetch.
    Idle,
    Loading,
    Success,
    Error,
}

/// State of one cached read.
#[derive(Clone)]
pub struct CacheEntry {
    pub data: Option<CachedValue>,
    pub fetched_at: Option<Instant>,
    pub stale_after: Duration,
    pub status: QueryStatus,
    /// Fetch that readers of this key currently coalesce onto.
    pub in_flight: Option<RequestId>,
    pub last_error: Option<HangarError>,
    /// Most recent response written into this entry.
    pub applied_request: Option<RequestId>,
    /// Responses from requests issued before this id predate the last
    /// invalidation: their data is kept but never counted as fresh.
    pub fresh_from: RequestId,
    /// First request id that belongs to this entry. Older responses were
    /// issued for an entry that has since been purged and are dropped.
    pub epoch: RequestId,
    /// Last time the entry was created, read or written.
    pub touched_at: Instant,
}

impl CacheEntry {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            data: None,
            fetched_at: None,
            stale_after,
            status: QueryStatus::Idle,
            in_flight: None,
            last_error: None,
            applied_request: None,
            fresh_from: 0,
            epoch: 0,
            touched_at: Instant::now(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// True when the entry can be served without a fetch under `max_staleness`.
    pub fn is_fresh(&self, now: Instant, max_staleness: Duration) -> bool {
        if self.status != QueryStatus::Success {
            return false;
        }
        match self.fetched_at {
            Some(fetched_at) => now.saturating_duration_since(fetched_at) < max_staleness,
            None => false,
        }
    }

    /// Age of the cached data, if any was ever fetched.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.fetched_at
            .map(|fetched_at| now.saturating_duration_since(fetched_at))
    }

    /// The cached payload as `T`, if present and of that type.
    pub fn data_as<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.data.clone().and_then(|value| value.downcast::<T>().ok())
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("has_data", &self.data.is_some())
            .field("fetched_at", &self.fetched_at)
            .field("stale_after", &self.stale_after)
            .field("status", &self.status)
            .field("in_flight", &self.in_flight)
            .field("last_error", &self.last_error)
            .field("applied_request", &self.applied_request)
            .field("fresh_from", &self.fresh_from)
            .field("epoch", &self.epoch)
            .field("touched_at", &self.touched_at)
            .finish()
    }
}

/// Change delivered to subscribers of a key.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Updated { key: QueryKey, entry: CacheEntry },
    Purged { key: QueryKey },
}

impl CacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            Self::Updated { key, .. } | Self::Purged { key } => key,
        }
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            Self::Updated { entry, .. } => Some(entry),
            Self::Purged { .. } => None,
        }
    }
}

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct StoreInner {
    entries: DashMap<QueryKey, CacheEntry>,
    subscribers: DashMap<QueryKey, Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    next_request: AtomicU64,
}

/// Shared handle to the cache store. Clones address the same store.
#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entry for `key`.
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.inner.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// All keys currently cached.
    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Replace the entry for `key`.
    pub fn set(&self, key: QueryKey, entry: CacheEntry) {
        self.inner.entries.insert(key.clone(), entry.clone());
        self.notify(CacheEvent::Updated { key, entry });
    }

    /// Read-modify-write the entry for `key`, creating it if absent.
    pub fn update<R>(
        &self,
        key: &QueryKey,
        stale_after: Duration,
        f: impl FnOnce(&mut CacheEntry) -> R,
    ) -> R {
        self.modify(key, stale_after, |entry| (true, f(entry)))
    }

    /// Like [`update`](Self::update), but the closure reports whether it
    /// changed the entry; subscribers hear only about actual changes.
    ///
    /// A newly created entry starts a fresh epoch: responses to requests
    /// issued before it existed are not applied to it.
    pub fn modify<R>(
        &self,
        key: &QueryKey,
        stale_after: Duration,
        f: impl FnOnce(&mut CacheEntry) -> (bool, R),
    ) -> R {
        let epoch = self.peek_next_request_id();
        let (changed, result, snapshot) = {
            let mut entry = self
                .inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry {
                    epoch,
                    fresh_from: epoch,
                    ..CacheEntry::new(stale_after)
                });
            entry.touched_at = Instant::now();
            let (changed, result) = f(entry.value_mut());
            (changed, result, entry.value().clone())
        };
        if changed {
            self.notify(CacheEvent::Updated {
                key: key.clone(),
                entry: snapshot,
            });
        }
        result
    }

    /// Read-modify-write an existing entry.
    ///
    /// Returns `None` without touching anything when the entry is absent,
    /// e.g. because it was purged while a fetch was outstanding. The closure
    /// returns whether it changed the entry; subscribers hear only about
    /// actual changes.
    pub fn update_existing<R>(
        &self,
        key: &QueryKey,
        f: impl FnOnce(&mut CacheEntry) -> (bool, R),
    ) -> Option<R> {
        let (changed, result, snapshot) = {
            let mut entry = self.inner.entries.get_mut(key)?;
            entry.touched_at = Instant::now();
            let (changed, result) = f(entry.value_mut());
            (changed, result, entry.value().clone())
        };
        if changed {
            self.notify(CacheEvent::Updated {
                key: key.clone(),
                entry: snapshot,
            });
        }
        Some(result)
    }

    /// Force the next read of every matching key to refetch.
    ///
    /// Cached data stays servable. A fetch still outstanding for a matching
    /// key is detached from coalescing and its eventual response will not
    /// count as fresh. Returns the number of entries marked.
    pub fn mark_stale(&self, prefix: &KeyPrefix) -> usize {
        let fence = self.peek_next_request_id();
        let mut changed = Vec::new();
        for mut entry in self.inner.entries.iter_mut() {
            if !prefix.matches(entry.key()) {
                continue;
            }
            let key = entry.key().clone();
            let value = entry.value_mut();
            value.status = QueryStatus::Idle;
            value.in_flight = None;
            value.fresh_from = value.fresh_from.max(fence);
            changed.push((key, value.clone()));
        }
        let count = changed.len();
        for (key, entry) in changed {
            self.notify(CacheEvent::Updated { key, entry });
        }
        count
    }

    /// Remove the entry for `key` outright.
    pub fn purge(&self, key: &QueryKey) -> bool {
        let removed = self.inner.entries.remove(key).is_some();
        if removed {
            self.notify(CacheEvent::Purged { key: key.clone() });
        }
        removed
    }

    /// Record a read of `key` that was served without modifying the entry.
    pub fn touch(&self, key: &QueryKey) {
        if let Some(mut entry) = self.inner.entries.get_mut(key) {
            entry.touched_at = Instant::now();
        }
    }

    /// Drop entries nobody is using.
    ///
    /// An entry is collected when it has no subscriber, no fetch in flight
    /// and has not been touched for `idle_for`. Returns how many entries
    /// were removed.
    pub fn collect_garbage(&self, idle_for: Duration) -> usize {
        let now = Instant::now();
        let idle = |entry: &CacheEntry| {
            entry.in_flight.is_none()
                && now.saturating_duration_since(entry.touched_at) >= idle_for
        };
        let candidates: Vec<QueryKey> = self
            .inner
            .entries
            .iter()
            .filter(|entry| idle(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in candidates {
            if self.subscriber_count(&key) > 0 {
                continue;
            }
            if self.inner.entries.remove_if(&key, |_, entry| idle(entry)).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Remove every entry. Subscriptions stay registered.
    pub fn clear(&self) {
        let keys = self.keys();
        for key in keys {
            self.purge(&key);
        }
    }

    /// Register `callback` for changes to `key`.
    ///
    /// The returned guard unsubscribes when dropped.
    pub fn subscribe<F>(&self, key: QueryKey, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(key.clone())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        Subscription {
            store: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.inner
            .subscribers
            .get(key)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Allocate a new request id.
    pub fn next_request_id(&self) -> RequestId {
        self.inner.next_request.fetch_add(1, Ordering::SeqCst)
    }

    fn peek_next_request_id(&self) -> RequestId {
        self.inner.next_request.load(Ordering::SeqCst)
    }

    fn notify(&self, event: CacheEvent) {
        let callbacks: Vec<Callback> = match self.inner.subscribers.get(event.key()) {
            Some(subs) => subs.iter().map(|s| Arc::clone(&s.callback)).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(&event);
        }
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.inner.entries.len())
            .field("subscribed_keys", &self.inner.subscribers.len())
            .finish()
    }
}

/// Registration of a callback on one key. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    key: QueryKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let now_empty = match inner.subscribers.get_mut(&self.key) {
            Some(mut subs) => {
                subs.retain(|s| s.id != self.id);
                subs.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.subscribers.remove_if(&self.key, |_, subs| subs.is_empty());
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn key(ns: &str, id: &str) -> QueryKey {
        QueryKey::detail(ns, id).unwrap()
    }

    fn list_key(ns: &str, search: &str) -> QueryKey {
        QueryKey::list(ns, &search_params(search)).unwrap()
    }

    fn search_params(search: &str) -> std::collections::BTreeMap<&'static str, String> {
        let mut params = std::collections::BTreeMap::new();
        params.insert("search", search.to_string());
        params
    }

    fn loaded(value: i32) -> CacheEntry {
        CacheEntry {
            data: Some(Arc::new(value)),
            fetched_at: Some(Instant::now()),
            status: QueryStatus::Success,
            ..CacheEntry::new(Duration::from_secs(60))
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<CacheEvent>>>, impl Fn(&CacheEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |event: &CacheEvent| {
            sink.lock().unwrap().push(event.clone());
        })
    }

    #[test]
    fn test_get_and_set() {
        let store = CacheStore::new();
        let k = key("clients", "1");
        assert!(store.get(&k).is_none());

        store.set(k.clone(), loaded(7));
        let entry = store.get(&k).unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(*entry.data_as::<i32>().unwrap(), 7);
        assert!(entry.data_as::<String>().is_none());
    }

    #[test]
    fn test_mark_stale_keeps_data() {
        let store = CacheStore::new();
        let a = list_key("products", "");
        let b = list_key("products", "oil");
        let detail = key("products", "3");
        store.set(a.clone(), loaded(1));
        store.set(b.clone(), loaded(2));
        store.set(detail.clone(), loaded(3));

        let marked = store.mark_stale(&KeyPrefix::lists("products"));
        assert_eq!(marked, 2);

        for k in [&a, &b] {
            let entry = store.get(k).unwrap();
            assert_eq!(entry.status, QueryStatus::Idle);
            assert!(entry.has_data());
        }
        assert_eq!(store.get(&detail).unwrap().status, QueryStatus::Success);
    }

    #[test]
    fn test_mark_stale_detaches_in_flight() {
        let store = CacheStore::new();
        let k = key("clients", "1");
        store.update(&k, Duration::from_secs(60), |_| ());
        let id = store.next_request_id();
        store.update(&k, Duration::from_secs(60), |e| {
            e.status = QueryStatus::Loading;
            e.in_flight = Some(id);
        });

        store.mark_stale(&KeyPrefix::exact(&k));
        let entry = store.get(&k).unwrap();
        assert_eq!(entry.in_flight, None);
        assert!(entry.fresh_from > id);
    }

    #[test]
    fn test_purge_removes_entry() {
        let store = CacheStore::new();
        let k = key("services", "7");
        store.set(k.clone(), loaded(7));
        assert!(store.purge(&k));
        assert!(store.get(&k).is_none());
        assert!(!store.purge(&k));
    }

    #[test]
    fn test_update_existing_skips_missing() {
        let store = CacheStore::new();
        let k = key("services", "7");
        assert_eq!(store.update_existing(&k, |_| (true, ())), None);
        assert!(!store.contains(&k));
    }

    #[test]
    fn test_subscribers_receive_complete_snapshots() {
        let store = CacheStore::new();
        let k = key("clients", "42");
        let (events, callback) = recorder();
        let _sub = store.subscribe(k.clone(), callback);

        store.set(k.clone(), loaded(42));
        store.mark_stale(&KeyPrefix::detail("clients", "42"));
        store.purge(&k);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        let first = events[0].entry().unwrap();
        assert_eq!(first.status, QueryStatus::Success);
        assert!(first.has_data());
        assert_eq!(events[1].entry().unwrap().status, QueryStatus::Idle);
        assert!(matches!(events[2], CacheEvent::Purged { .. }));
    }

    #[test]
    fn test_other_keys_do_not_notify() {
        let store = CacheStore::new();
        let (events, callback) = recorder();
        let _sub = store.subscribe(key("clients", "42"), callback);
        store.set(key("clients", "43"), loaded(43));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let store = CacheStore::new();
        let k = key("clients", "1");
        let (events, callback) = recorder();
        let sub = store.subscribe(k.clone(), callback);
        assert_eq!(store.subscriber_count(&k), 1);

        sub.unsubscribe();
        assert_eq!(store.subscriber_count(&k), 0);
        store.set(k, loaded(1));
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_callback_may_read_store() {
        let store = CacheStore::new();
        let k = key("clients", "5");
        let seen = Arc::new(Mutex::new(None));
        let reader = store.clone();
        let seen_in_cb = Arc::clone(&seen);
        let key_in_cb = k.clone();
        let _sub = store.subscribe(k.clone(), move |_| {
            let status = reader.get(&key_in_cb).map(|e| e.status);
            *seen_in_cb.lock().unwrap() = status;
        });

        store.set(k, loaded(5));
        assert_eq!(*seen.lock().unwrap(), Some(QueryStatus::Success));
    }

    #[test]
    fn test_recreated_entry_starts_new_epoch() {
        let store = CacheStore::new();
        let k = key("services", "7");
        let old = store.next_request_id();
        store.update(&k, Duration::from_secs(60), |e| e.in_flight = Some(old));
        store.purge(&k);

        store.update(&k, Duration::from_secs(60), |_| ());
        assert!(store.get(&k).unwrap().epoch > old);
    }

    #[test]
    fn test_modify_without_change_is_silent() {
        let store = CacheStore::new();
        let k = key("clients", "1");
        let (events, callback) = recorder();
        let _sub = store.subscribe(k.clone(), callback);
        store.modify(&k, Duration::from_secs(60), |_| (false, ()));
        assert!(events.lock().unwrap().is_empty());
        assert!(store.contains(&k));
    }

    #[test]
    fn test_clear_purges_everything() {
        let store = CacheStore::new();
        store.set(key("a", "1"), loaded(1));
        store.set(key("b", "2"), loaded(2));
        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_garbage_drops_idle_unobserved_entries() {
        let store = CacheStore::new();
        let idle = list_key("clients", "jo");
        let watched = list_key("clients", "ma");
        let loading = key("clients", "1");
        let recent = key("clients", "2");
        store.set(idle.clone(), loaded(1));
        store.set(watched.clone(), loaded(2));
        store.set(
            loading.clone(),
            CacheEntry {
                in_flight: Some(7),
                status: QueryStatus::Loading,
                ..CacheEntry::new(Duration::from_secs(60))
            },
        );
        let _subscription = store.subscribe(watched.clone(), |_| {});

        tokio::time::advance(Duration::from_secs(300)).await;
        store.set(recent.clone(), loaded(3));

        assert_eq!(store.collect_garbage(Duration::from_secs(300)), 1);
        assert!(!store.contains(&idle));
        assert!(store.contains(&watched));
        assert!(store.contains(&loading));
        assert!(store.contains(&recent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_postpones_collection() {
        let store = CacheStore::new();
        let k = key("products", "9");
        store.set(k.clone(), loaded(9));

        tokio::time::advance(Duration::from_secs(200)).await;
        store.touch(&k);
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(store.collect_garbage(Duration::from_secs(300)), 0);

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(store.collect_garbage(Duration::from_secs(300)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_is_fresh_window() {
        let mut entry = loaded(1);
        let now = Instant::now();
        entry.fetched_at = Some(now);
        assert!(entry.is_fresh(now + Duration::from_secs(10), Duration::from_secs(60)));
        assert!(!entry.is_fresh(now + Duration::from_secs(60), Duration::from_secs(60)));
        entry.status = QueryStatus::Idle;
        assert!(!entry.is_fresh(now, Duration::from_secs(60)));
    }
}
