use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::time::Instant;

use crate::config::CacheConfig;

struct CacheEntry {
    value: JsonValue,
    expires_at: Instant,
    /// Insertion sequence; eviction removes the lowest live sequence.
    seq: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order as (seq, key); stale pairs (overwritten keys) are
    /// skipped during eviction.
    insertion_order: VecDeque<(u64, String)>,
    next_seq: u64,
}

/// In-process cache for shaped read responses, keyed by namespace.
///
/// Entries carry an absolute expiry and are never returned past it. The store
/// is bounded: at capacity, the oldest-inserted entry is evicted. Writes to a
/// resource group call [`invalidate`](ResponseCache::invalidate) with the
/// group's namespace so subsequent reads miss and repopulate.
///
/// Shared process-wide state: one mutex guards the map, so insert/evict are
/// atomic per key and readers never observe a partial entry.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
                next_seq: 0,
            }),
            capacity: config.capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a key; expired entries are removed and reported as misses.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a value that expires `ttl` from now, evicting the
    /// oldest-inserted entry first if the store is full.
    pub fn set(&self, key: impl Into<String>, value: JsonValue, ttl: Duration) {
        let key = key.into();
        let expires_at = Instant::now() + ttl;
        let mut inner = self.lock();

        if !inner.entries.contains_key(&key) {
            while inner.entries.len() >= self.capacity {
                if !self.evict_oldest(&mut inner) {
                    break;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.insertion_order.push_back((seq, key.clone()));
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                seq,
            },
        );
    }

    /// Remove every entry whose key starts with `prefix`; returns how many
    /// were removed. Call after writing to a resource group, with the group's
    /// namespace as the prefix.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - inner.entries.len();
        if removed > 0 {
            let entries = std::mem::take(&mut inner.entries);
            inner.insertion_order.retain(|(seq, key)| {
                entries.get(key).is_some_and(|entry| entry.seq == *seq)
            });
            inner.entries = entries;
            tracing::debug!(prefix, removed, "invalidated cached responses");
        }
        removed
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.insertion_order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deterministic key for a logical request: namespace, path, and query
    /// pairs sorted so incidental parameter order cannot split the cache.
    #[must_use]
    pub fn generate_key(namespace: &str, path: &str, query: &[(&str, &str)]) -> String {
        if query.is_empty() {
            return format!("{namespace}:{path}");
        }
        let mut pairs = query.to_vec();
        pairs.sort_unstable();
        let qs = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{namespace}:{path}?{qs}")
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict the oldest-inserted live entry. Returns false when the order
    /// queue held only stale pairs.
    fn evict_oldest(&self, inner: &mut CacheInner) -> bool {
        while let Some((seq, key)) = inner.insertion_order.pop_front() {
            let live = inner
                .entries
                .get(&key)
                .is_some_and(|entry| entry.seq == seq);
            if live {
                inner.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "evicted oldest cache entry at capacity");
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Counters for the operational health surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate over the cache's lifetime, 0.0 when nothing was looked up.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_capacity(capacity: usize) -> ResponseCache {
        ResponseCache::new(&CacheConfig { capacity })
    }

    #[test]
    fn generated_keys_ignore_query_order() {
        let a = ResponseCache::generate_key(
            "projects",
            "/api/projects",
            &[("status", "active"), ("page", "2")],
        );
        let b = ResponseCache::generate_key(
            "projects",
            "/api/projects",
            &[("page", "2"), ("status", "active")],
        );
        assert_eq!(a, b);
        assert_eq!(a, "projects:/api/projects?page=2&status=active");
    }

    #[test]
    fn invalidate_removes_all_and_only_prefix_matches() {
        let cache = cache_with_capacity(16);
        let ttl = Duration::from_secs(60);
        cache.set("projects:/api/projects", serde_json::json!([1, 2]), ttl);
        cache.set("projects:/api/projects?page=2", serde_json::json!([3]), ttl);
        cache.set("compliance:/api/deadlines", serde_json::json!([]), ttl);

        assert_eq!(cache.invalidate("projects:"), 2);
        assert!(cache.get("projects:/api/projects").is_none());
        assert!(cache.get("compliance:/api/deadlines").is_some());
    }

    #[test]
    fn capacity_evicts_oldest_inserted() {
        let cache = cache_with_capacity(2);
        let ttl = Duration::from_secs(60);
        cache.set("a:1", serde_json::json!(1), ttl);
        cache.set("a:2", serde_json::json!(2), ttl);
        cache.set("a:3", serde_json::json!(3), ttl);

        assert!(cache.get("a:1").is_none());
        assert!(cache.get("a:2").is_some());
        assert!(cache.get("a:3").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn overwriting_a_key_does_not_evict_others() {
        let cache = cache_with_capacity(2);
        let ttl = Duration::from_secs(60);
        cache.set("a:1", serde_json::json!(1), ttl);
        cache.set("a:2", serde_json::json!(2), ttl);
        cache.set("a:1", serde_json::json!(10), ttl);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a:1"), Some(serde_json::json!(10)));
        assert!(cache.get("a:2").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_never_returned() {
        let cache = cache_with_capacity(16);
        cache.set("a:1", serde_json::json!(1), Duration::from_millis(50));

        assert!(cache.get("a:1").is_some());
        tokio::time::advance(Duration::from_millis(51)).await;
        assert!(cache.get("a:1").is_none());
        // The expired entry was dropped, not just hidden.
        assert!(cache.is_empty());
    }

    #[test]
    fn hit_rate_reflects_lookups() {
        let cache = cache_with_capacity(16);
        cache.set("a:1", serde_json::json!(1), Duration::from_secs(60));
        let _ = cache.get("a:1");
        let _ = cache.get("a:missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
