// cache.rs - Bounded TTL cache with stale-fill protection.
//
// The cache is a plain data structure; the `Store` wraps each instance in a
// mutex. Writers invalidate synchronously before returning, and every
// invalidation bumps an epoch. A reader that missed captures the epoch
// before going to the backend and uses `insert_if_current`, so a value read
// before a concurrent write can never be cached after that write's
// invalidation.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    expires_at: DateTime<Utc>,
    inserted: u64,
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
    slots: HashMap<K, Slot<V>>,
    capacity: usize,
    ttl: Duration,
    epoch: u64,
    next_insert: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
            epoch: 0,
            next_insert: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A live value for `key`. Expired entries are dropped on access.
    pub fn get(&mut self, key: &K, now: DateTime<Utc>) -> Option<V> {
        match self.slots.get(key) {
            Some(slot) if now < slot.expires_at => {
                self.stats.hits += 1;
                Some(slot.value.clone())
            }
            Some(_) => {
                self.slots.remove(key);
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// The current invalidation epoch. Capture before a backend read.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        if !self.slots.contains_key(&key) && self.slots.len() >= self.capacity {
            self.make_room(now);
        }
        let inserted = self.next_insert;
        self.next_insert += 1;
        self.slots.insert(
            key,
            Slot {
                value,
                expires_at: now + self.ttl,
                inserted,
            },
        );
    }

    /// Insert only if nothing was invalidated since `epoch` was captured.
    /// Returns whether the value was cached.
    pub fn insert_if_current(&mut self, key: K, value: V, now: DateTime<Utc>, epoch: u64) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.insert(key, value, now);
        true
    }

    pub fn invalidate(&mut self, key: &K) {
        self.slots.remove(key);
        self.epoch += 1;
        self.stats.invalidations += 1;
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.epoch += 1;
        self.stats.invalidations += 1;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    // Purge expired entries; if still full, evict the oldest insertion.
    fn make_room(&mut self, now: DateTime<Utc>) {
        let before = self.slots.len();
        self.slots.retain(|_, slot| now < slot.expires_at);
        self.stats.evictions += (before - self.slots.len()) as u64;

        if self.slots.len() < self.capacity {
            return;
        }
        let oldest = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.inserted)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.slots.remove(&key);
            self.stats.evictions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = TtlCache::new(4, Duration::seconds(30));
        cache.insert("a", 1, at(0));
        assert_eq!(cache.get(&"a", at(29)), Some(1));
        assert_eq!(cache.get(&"a", at(30)), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn overflow_evicts_expired_then_oldest() {
        let mut cache = TtlCache::new(2, Duration::seconds(10));
        cache.insert("old", 1, at(0));
        cache.insert("mid", 2, at(5));
        // "old" has expired by now, so it goes first.
        cache.insert("new", 3, at(11));
        assert_eq!(cache.get(&"mid", at(11)), Some(2));
        assert_eq!(cache.get(&"old", at(11)), None);

        // Nothing expired: the oldest insertion ("mid") is evicted.
        cache.insert("newest", 4, at(12));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"mid", at(12)), None);
        assert_eq!(cache.get(&"new", at(12)), Some(3));
    }

    #[test]
    fn stale_fill_after_invalidation_is_dropped() {
        let mut cache = TtlCache::new(4, Duration::seconds(60));
        let epoch = cache.epoch();
        // A writer invalidates while the reader is at the backend.
        cache.invalidate(&"k");
        assert!(!cache.insert_if_current("k", "stale", at(0), epoch));
        assert_eq!(cache.get(&"k", at(1)), None);

        let epoch = cache.epoch();
        assert!(cache.insert_if_current("k", "fresh", at(0), epoch));
        assert_eq!(cache.get(&"k", at(1)), Some("fresh"));
    }

    #[test]
    fn reinserting_existing_key_does_not_evict() {
        let mut cache = TtlCache::new(1, Duration::seconds(60));
        cache.insert("a", 1, at(0));
        cache.insert("a", 2, at(1));
        assert_eq!(cache.get(&"a", at(2)), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }
}
