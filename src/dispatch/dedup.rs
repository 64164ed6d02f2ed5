//! Suppression of redelivered webhook messages

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Remembers recently seen message keys for a bounded time
pub struct IdempotencyCache {
    seen: DashMap<String, Instant>,
    ttl: Duration,
    capacity: usize,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Record `key`; returns false when it was already seen within the TTL
    pub fn check_and_insert(&self, key: &str) -> bool {
        let now = Instant::now();
        let fresh = match self.seen.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) > self.ttl {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };

        if fresh && self.seen.len() > self.capacity {
            self.evict();
        }
        fresh
    }

    /// Forget a key so a later redelivery is processed again
    pub fn forget(&self, key: &str) {
        self.seen.remove(key);
    }

    /// Drop expired keys
    pub fn purge_expired(&self) -> usize {
        let before = self.seen.len();
        let ttl = self.ttl;
        self.seen.retain(|_, seen_at| seen_at.elapsed() <= ttl);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&self) {
        let purged = self.purge_expired();
        while self.seen.len() > self.capacity {
            let oldest = self
                .seen
                .iter()
                .min_by_key(|entry| *entry.value())
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.seen.remove(&key);
                }
                None => break,
            }
        }
        debug!(purged, size = self.seen.len(), "Evicted idempotency keys");
    }
}
