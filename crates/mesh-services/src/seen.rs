//! Bounded set of message ids this node has already processed.
//!
//! Entries leave in insertion order once the set is full, and are also
//! dropped once older than `max_age`. Lookups never refresh an entry, so the
//! LRU order is plain arrival order.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

pub struct SeenSet {
    entries: LruCache<String, Instant>,
    max_age: Option<Duration>,
}

impl SeenSet {
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            max_age,
        }
    }

    /// Record `id`. Returns true if it was not already present.
    pub fn insert(&mut self, id: &str) -> bool {
        self.insert_at(id, Instant::now())
    }

    pub fn insert_at(&mut self, id: &str, now: Instant) -> bool {
        self.prune(now);
        if self.entries.contains(id) {
            return false;
        }
        self.entries.push(id.to_string(), now);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains(id)
    }

    /// Drop entries older than `max_age`. Returns how many went.
    pub fn prune(&mut self, now: Instant) -> usize {
        let Some(max_age) = self.max_age else {
            return 0;
        };
        let mut removed = 0;
        while let Some((_, inserted)) = self.entries.peek_lru() {
            if now.saturating_duration_since(*inserted) <= max_age {
                break;
            }
            self.entries.pop_lru();
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}
