use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// An LRU cache where each entry also carries its own TTL, set at
/// insertion time. Used for the peer manager's weighted-selection cache
/// (spec §4.1) and the gateway-header root-tx index's optional LRU
/// (spec §4.6).
pub struct TtlLru<K, V> {
    inner: Mutex<LruCache<K, Entry<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLru<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns the cached value if present and not expired. An expired
    /// entry is evicted as a side effect of the lookup.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.get(key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return None,
        };
        if expired {
            inner.pop(key);
            None
        } else {
            inner.get(key).map(|entry| entry.value.clone())
        }
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.inner.lock().put(key, Entry { value, expires_at });
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.lock().pop(key);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
