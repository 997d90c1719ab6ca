//! Bounded memory of recently seen event ids.

use lru::LruCache;
use std::num::NonZeroUsize;

/// Remembers the most recently seen event ids, evicting the least recently
/// seen one once full. An id that was evicted counts as new again.
pub struct EventDeduplicator {
    seen: LruCache<String, ()>,
}

impl EventDeduplicator {
    /// Create a deduplicator remembering up to `capacity` ids (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity),
        }
    }

    /// Record `event_id`. Returns `true` the first time it is seen, `false`
    /// for a repeat. A repeat counts as a fresh sighting for eviction order.
    pub fn observe(&mut self, event_id: &str) -> bool {
        if self.seen.get(event_id).is_some() {
            return false;
        }
        self.seen.put(event_id.to_string(), ());
        true
    }

    /// Whether `event_id` is currently remembered. Does not touch eviction order.
    pub fn contains(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    /// Number of ids currently remembered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no id has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Maximum number of ids remembered at once.
    pub fn capacity(&self) -> usize {
        self.seen.cap().get()
    }
}
