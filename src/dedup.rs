//! Time-windowed duplicate suppression for inbound requests.
//!
//! Multicast can hand the same datagram to a listener more than once. The
//! responder remembers `(correlation id, source)` pairs for a short window
//! and ignores repeats. Memory is bounded twice: entries older than the
//! window are pruned, and the cache never holds more than `capacity`
//! entries (oldest evicted first).

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{CorrelationId, Reference};

/// Default retention window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(2);

/// Default maximum number of remembered requests.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

type Key = (CorrelationId, Reference);

/// Bounded cache of recently seen request keys.
#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    capacity: usize,
    seen: HashMap<Key, Instant>,
    order: VecDeque<(Instant, Key)>,
}

impl DedupCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record a request. Returns `true` if it is new, `false` if the same
    /// key was seen within the window.
    pub fn check_and_insert(&mut self, correlation_id: CorrelationId, source: &Reference) -> bool {
        let now = Instant::now();
        self.prune(now);

        let key = (correlation_id, source.clone());
        if self.seen.contains_key(&key) {
            return false;
        }

        while self.seen.len() >= self.capacity {
            match self.order.pop_front() {
                Some((_, oldest)) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }

        self.seen.insert(key.clone(), now);
        self.order.push_back((now, key));
        true
    }

    /// Number of keys currently remembered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.order.front() {
            if now.duration_since(*at) < self.window {
                break;
            }
            if let Some((_, key)) = self.order.pop_front() {
                self.seen.remove(&key);
            }
        }
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW, DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(s: &str) -> Reference {
        Reference::from(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_within_window_suppressed() {
        let mut cache = DedupCache::new(Duration::from_millis(500), 16);

        assert!(cache.check_and_insert(1, &src("a")));
        assert!(!cache.check_and_insert(1, &src("a")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_includes_source() {
        let mut cache = DedupCache::new(Duration::from_millis(500), 16);

        assert!(cache.check_and_insert(1, &src("a")));
        assert!(cache.check_and_insert(1, &src("b")));
        assert!(cache.check_and_insert(2, &src("a")));
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_window() {
        let mut cache = DedupCache::new(Duration::from_millis(500), 16);
        assert!(cache.check_and_insert(1, &src("a")));

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(!cache.check_and_insert(1, &src("a")));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.check_and_insert(1, &src("a")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let mut cache = DedupCache::new(Duration::from_secs(60), 2);

        assert!(cache.check_and_insert(1, &src("a")));
        assert!(cache.check_and_insert(2, &src("a")));
        assert!(cache.check_and_insert(3, &src("a")));
        assert_eq!(cache.len(), 2);

        // 1 was evicted, so it is new again
        assert!(cache.check_and_insert(1, &src("a")));
        // 3 is still remembered
        assert!(!cache.check_and_insert(3, &src("a")));
    }
}
