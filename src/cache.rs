//! # TTL Cache
//!
//! A capacity-bounded cache whose entries expire after a fixed time-to-live,
//! plus [`SharedCache`], an async wrapper that coalesces concurrent loads of
//! the same key so repeated dashboard polling hits the upstream API once.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::Mutex;

/// A TTL cache with least-recently-used eviction at capacity.
///
/// Eviction is a linear scan; capacities are in the hundreds, so this is
/// simpler than maintaining a linked list.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, CacheEntry<V>>,
    access_counter: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a live value, updating its access time.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_at(key, Instant::now())
    }

    /// [`get`](Self::get) evaluated at `now`. Expired entries are removed.
    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some(entry) => now.saturating_duration_since(entry.inserted_at) >= self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }

        self.access_counter += 1;
        let counter = self.access_counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = counter;
            &entry.value
        })
    }

    /// Insert a value, restarting its TTL.
    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// [`insert`](Self::insert) evaluated at `now`.
    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        self.access_counter += 1;

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted_at = now;
            entry.last_access = self.access_counter;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.purge_expired_at(now);
        }
        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_access: self.access_counter,
            },
        );
    }

    /// Remove a specific key from the cache.
    pub fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
        before - self.entries.len()
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_counter = 0;
    }

    /// Number of stored entries, including ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict the least recently used entry.
    fn evict_oldest(&mut self) {
        let oldest_key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest_key {
            self.entries.remove(&key);
        }
    }
}

/// Concurrency-safe TTL cache with single-flight loading.
///
/// Constructed by the caller and injected into the service, so its lifetime
/// and contents are explicit. Concurrent [`get_or_load`](Self::get_or_load)
/// calls for the same key serialize on a per-key lock: the first runs the
/// loader, the rest observe its cached value.
pub struct SharedCache<K, V> {
    entries: Mutex<TtlCache<K, V>>,
    // Never held across an await, so it can be released from Drop
    in_flight: StdMutex<InFlightMap<K>>,
}

type InFlightMap<K> = HashMap<K, Arc<Mutex<()>>>;

/// Removes a key's in-flight lock once its last user finishes, including
/// when the loading future is dropped mid-load.
struct InFlightGuard<'a, K: Eq + Hash> {
    map: &'a StdMutex<InFlightMap<K>>,
    key: K,
    lock: Arc<Mutex<()>>,
}

impl<K: Eq + Hash> Drop for InFlightGuard<'_, K> {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this guard hold the lock when nobody else is waiting
        if Arc::strong_count(&self.lock) <= 2 {
            map.remove(&self.key);
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> SharedCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(TtlCache::new(capacity, ttl)),
            in_flight: StdMutex::new(HashMap::new()),
        }
    }

    /// Cached value for `key`, if still live.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries.lock().await.insert(key, value);
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.lock().await.invalidate(key);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Return the cached value for `key`, or run `load` once to produce it.
    ///
    /// `load` yields the value and whether it may be cached; uncacheable
    /// values (degraded responses) are returned but not stored.
    pub async fn get_or_load<F, Fut>(&self, key: K, load: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (V, bool)>,
    {
        if let Some(value) = self.get(&key).await {
            return value;
        }

        let guard = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            InFlightGuard {
                map: &self.in_flight,
                key: key.clone(),
                lock: Arc::clone(in_flight.entry(key.clone()).or_default()),
            }
        };

        let value = {
            let _held = guard.lock.lock().await;

            // Another caller may have filled the entry while we waited
            if let Some(value) = self.get(&key).await {
                debug!("[SharedCache] coalesced concurrent load");
                value
            } else {
                let (value, cacheable) = load().await;
                if cacheable {
                    self.insert(key.clone(), value.clone()).await;
                }
                value
            }
        };

        drop(guard);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn test_basic_operations() {
        let mut cache: TtlCache<String, i32> = TtlCache::new(3, TTL);

        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);

        assert_eq!(cache.get(&"a".to_string()), Some(&1));
        assert_eq!(cache.get(&"b".to_string()), Some(&2));
        assert_eq!(cache.get(&"z".to_string()), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expiry() {
        let mut cache: TtlCache<&str, i32> = TtlCache::new(3, TTL);
        let t0 = Instant::now();

        cache.insert_at("a", 1, t0);
        assert_eq!(cache.get_at(&"a", t0 + Duration::from_secs(299)), Some(&1));
        assert_eq!(cache.get_at(&"a", t0 + Duration::from_secs(300)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_restarts_ttl() {
        let mut cache: TtlCache<&str, i32> = TtlCache::new(3, TTL);
        let t0 = Instant::now();

        cache.insert_at("a", 1, t0);
        cache.insert_at("a", 10, t0 + Duration::from_secs(200));
        assert_eq!(cache.get_at(&"a", t0 + Duration::from_secs(400)), Some(&10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_eviction_prefers_expired_then_lru() {
        let mut cache: TtlCache<&str, i32> = TtlCache::new(3, TTL);
        let t0 = Instant::now();

        cache.insert_at("a", 1, t0);
        cache.insert_at("b", 2, t0 + Duration::from_secs(100));
        cache.insert_at("c", 3, t0 + Duration::from_secs(100));

        // "a" is expired by now and goes first, even though "b" is LRU
        let t1 = t0 + Duration::from_secs(350);
        cache.insert_at("d", 4, t1);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get_at(&"a", t1), None);

        // Touch "b" so "c" becomes least recently used
        assert_eq!(cache.get_at(&"b", t1), Some(&2));
        cache.insert_at("e", 5, t1);
        assert_eq!(cache.get_at(&"c", t1), None);
        assert_eq!(cache.get_at(&"b", t1), Some(&2));
        assert_eq!(cache.get_at(&"e", t1), Some(&5));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache: TtlCache<&str, i32> = TtlCache::new(3, TTL);
        cache.insert("a", 1);
        cache.insert("b", 2);

        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_shared_cache_loads_once() {
        let cache: SharedCache<&str, u32> = SharedCache::new(10, TTL);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        for _ in 0..3 {
            let value = cache
                .get_or_load("k", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (7, true)
                })
                .await;
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shared_cache_skips_uncacheable() {
        let cache: SharedCache<&str, u32> = SharedCache::new(10, TTL);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        for _ in 0..2 {
            cache
                .get_or_load("k", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (0, false)
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_cache_coalesces_concurrent_loads() {
        let cache: SharedCache<&str, u32> = SharedCache::new(10, TTL);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let load = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            (42, true)
        };

        let (a, b) = tokio::join!(cache.get_or_load("k", load), cache.get_or_load("k", load));
        assert_eq!((a, b), (42, 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_load_releases_in_flight_entry() {
        let cache: SharedCache<&str, u32> = SharedCache::new(10, TTL);

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_load("k", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                (1, true)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(cache.in_flight.lock().unwrap().is_empty());
        assert_eq!(cache.len().await, 0);

        // The key is usable again afterwards
        let value = cache.get_or_load("k", || async { (2, true) }).await;
        assert_eq!(value, 2);
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }
}
