//! File-existence results with a TTL and least-recently-used eviction.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use lru::LruCache;

use crate::time::Clock;
use crate::time::SystemClock;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy)]
struct Entry {
    exists: bool,
    stored_at: Instant,
}

pub struct ExistenceCache {
    entries: LruCache<String, Entry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for ExistenceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl ExistenceCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
            clock,
        }
    }

    /// Cached result for `path`. A hit refreshes recency; an expired entry is
    /// dropped and reported as a miss.
    pub fn get(&mut self, path: &str) -> Option<bool> {
        let now = self.clock.now();
        let entry = *self.entries.get(path)?;
        if now.saturating_duration_since(entry.stored_at) >= self.ttl {
            self.entries.pop(path);
            return None;
        }
        Some(entry.exists)
    }

    pub fn insert(&mut self, path: impl Into<String>, exists: bool) {
        let entry = Entry {
            exists,
            stored_at: self.clock.now(),
        };
        self.entries.put(path.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn cache(capacity: usize, ttl_ms: u64) -> (ExistenceCache, ManualClock) {
        let clock = ManualClock::new();
        let cache = ExistenceCache::with_clock(
            capacity,
            Duration::from_millis(ttl_ms),
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn test_value_available_until_ttl() {
        let (mut cache, clock) = cache(10, 1000);
        cache.insert("/a", true);
        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get("/a"), Some(true));
        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("/a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_false_is_distinct_from_missing() {
        let (mut cache, _clock) = cache(10, 1000);
        cache.insert("/gone", false);
        assert_eq!(cache.get("/gone"), Some(false));
        assert_eq!(cache.get("/never"), None);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let (mut cache, _clock) = cache(2, 60_000);
        cache.insert("/a", true);
        cache.insert("/b", true);
        cache.insert("/c", true);
        assert_eq!(cache.get("/a"), None);
        assert_eq!(cache.get("/b"), Some(true));
        assert_eq!(cache.get("/c"), Some(true));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let (mut cache, _clock) = cache(2, 60_000);
        cache.insert("/a", true);
        cache.insert("/b", true);
        assert_eq!(cache.get("/a"), Some(true));
        cache.insert("/c", false);
        assert_eq!(cache.get("/b"), None);
        assert_eq!(cache.get("/a"), Some(true));
    }

    #[test]
    fn test_reinsert_refreshes_recency_and_ttl() {
        let (mut cache, clock) = cache(2, 1000);
        cache.insert("/a", true);
        cache.insert("/b", true);
        clock.advance(Duration::from_millis(600));
        cache.insert("/a", false);
        cache.insert("/c", true);
        assert_eq!(cache.get("/b"), None);
        clock.advance(Duration::from_millis(600));
        assert_eq!(cache.get("/a"), Some(false));
    }
}
