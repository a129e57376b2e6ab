//! Response cache with per-entry TTL, tag-based invalidation, and LRU eviction.
//!
//! Successful call results are stored as [`serde_json::Value`] under the
//! operation key. Expiry is evaluated lazily on [`ResponseCache::get`] and
//! eagerly by [`ResponseCache::sweep`], which the orchestrator drives from a
//! periodic task.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before least-recently-used eviction kicks in
    pub max_entries: usize,
    /// TTL applied when the caller does not specify one
    pub default_ttl: Duration,
    /// Interval between eager expiry sweeps
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(crate::DEFAULT_CACHE_TTL_SECS),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// A single cached result.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    ttl: Duration,
    access_count: u64,
    last_access: Instant,
    tags: Vec<String>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }

    fn matches(&self, pattern: &str) -> bool {
        self.tags.iter().any(|tag| tag_matches(tag, pattern))
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries at snapshot time
    pub entries: usize,
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that found nothing, or only an expired entry
    pub misses: u64,
    /// Entries dropped to stay under `max_entries`
    pub evictions: u64,
    /// Entries dropped by TTL expiry or invalidation
    pub invalidations: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
}

/// Key/value store for completed call results.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
}

impl ResponseCache {
    /// Create a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            config,
        }
    }

    /// Look up `key`, dropping the entry if its TTL has elapsed.
    ///
    /// A hit bumps the entry's access count and recency.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let live = inner.entries.get_mut(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                entry.access_count += 1;
                entry.last_access = now;
                Some(entry.value.clone())
            }
        });

        match live {
            Some(Some(value)) => {
                inner.hits += 1;
                Some(value)
            }
            Some(None) => {
                inner.entries.remove(key);
                inner.invalidations += 1;
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store `value` under `key` with the given TTL and tags.
    ///
    /// Evicts least-recently-used entries when the configured maximum is
    /// exceeded.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>, tags: Vec<String>) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                ttl: ttl.unwrap_or(self.config.default_ttl),
                access_count: 0,
                last_access: now,
                tags,
            },
        );

        while inner.entries.len() > self.config.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                    inner.evictions += 1;
                    debug!(key, "Evicted least-recently-used cache entry");
                }
                None => break,
            }
        }
    }

    /// Remove every entry with a tag matching `pattern`.
    ///
    /// A pattern is an exact tag, or a prefix followed by `*` (so `user:42:*`
    /// clears everything tagged for that user). Returns the number of entries
    /// removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.matches(pattern))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            inner.entries.remove(key);
        }
        inner.invalidations += keys.len() as u64;

        if !keys.is_empty() {
            debug!(pattern, removed = keys.len(), "Invalidated cache entries");
        }
        keys.len()
    }

    /// Drop every expired entry eagerly. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.invalidations += removed as u64;

        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Interval the orchestrator should sweep at.
    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }

    /// Snapshot of cache counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            invalidations: inner.invalidations,
        }
    }
}

fn tag_matches(tag: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => tag.starts_with(prefix),
        None => tag == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with_max(max_entries: usize) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            max_entries,
            ..Default::default()
        })
    }

    #[test]
    fn test_set_then_get_before_ttl() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.set("k", json!("v"), Some(Duration::from_secs(1)), vec![]);
        assert_eq!(cache.get("k"), Some(json!("v")));
    }

    #[test]
    fn test_get_after_ttl_is_miss() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.set("k", json!("v"), Some(Duration::from_millis(20)), vec![]);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_get_bumps_access_bookkeeping() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.set("k", json!(1), None, vec![]);
        cache.get("k");
        cache.get("k");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_invalidate_exact_tag() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.set("a", json!(1), None, vec!["news".into()]);
        cache.set("b", json!(2), None, vec!["trends".into()]);

        assert_eq!(cache.invalidate("news"), 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[test]
    fn test_invalidate_prefix_pattern() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.set("a", json!(1), None, vec!["user:42:feed".into()]);
        cache.set("b", json!(2), None, vec!["user:42:profile".into()]);
        cache.set("c", json!(3), None, vec!["user:7:feed".into()]);

        assert_eq!(cache.invalidate("user:42:*"), 2);
        assert_eq!(cache.get("c"), Some(json!(3)));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.set("old", json!(1), Some(Duration::from_millis(10)), vec![]);
        cache.set("fresh", json!(2), Some(Duration::from_secs(60)), vec![]);
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
    }

    #[test]
    fn test_lru_eviction_over_max_entries() {
        let cache = cache_with_max(2);
        cache.set("a", json!(1), None, vec![]);
        std::thread::sleep(Duration::from_millis(5));
        cache.set("b", json!(2), None, vec![]);
        std::thread::sleep(Duration::from_millis(5));

        // Touch "a" so "b" is the least recently used.
        cache.get("a");
        std::thread::sleep(Duration::from_millis(5));
        cache.set("c", json!(3), None, vec![]);

        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(json!(3)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_resets_entry() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.set("k", json!("old"), Some(Duration::from_millis(10)), vec![]);
        cache.set("k", json!("new"), Some(Duration::from_secs(60)), vec![]);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), Some(json!("new")));
    }
}
