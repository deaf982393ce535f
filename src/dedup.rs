//! Bounded TTL cache of recently seen webhook event ids.
//!
//! Providers redeliver events; replaying one inside the window must be
//! a no-op. The cache is bounded both by entry count and by age, so a
//! burst of unique ids cannot grow it without limit. Expiry of an old
//! id simply re-opens the door for that id, which is safe: the sync it
//! triggers is idempotent.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Concurrent event-id dedup cache.
pub struct DedupCache {
    seen: DashMap<String, Instant>,
    max_entries: usize,
    ttl: Duration,
}

impl DedupCache {
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self { seen: DashMap::new(), max_entries, ttl }
    }

    /// Record an event id. Returns `true` when the id is fresh and
    /// `false` when it was already seen inside the TTL window. The
    /// check-and-insert is atomic per id.
    pub fn insert(&self, event_id: &str) -> bool {
        let now = Instant::now();
        let fresh = match self.seen.entry(event_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) < self.ttl {
                    false
                } else {
                    occupied.insert(now);
                    true
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        };
        if fresh && self.seen.len() > self.max_entries {
            self.prune(now);
        }
        fresh
    }

    /// Forget an id, re-arming it for redelivery. Used when processing
    /// failed after the id was recorded, so the provider's retry is not
    /// swallowed as a duplicate.
    pub fn remove(&self, event_id: &str) {
        self.seen.remove(event_id);
    }

    /// Drop expired entries, then oldest entries until under capacity.
    fn prune(&self, now: Instant) {
        self.seen.retain(|_, at| now.duration_since(*at) < self.ttl);
        let over = self.seen.len().saturating_sub(self.max_entries);
        if over == 0 {
            return;
        }
        let mut entries: Vec<(String, Instant)> = self
            .seen
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by_key(|(_, at)| *at);
        for (key, _) in entries.into_iter().take(over) {
            self.seen.remove(&key);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
