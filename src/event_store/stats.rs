//! Replay hit/miss counters for the event store's admin stats surface.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic replay counters.
#[derive(Debug, Default)]
pub struct EventStoreStats {
    replay_requests: AtomicU64,
    replay_hits: AtomicU64,
    replay_misses: AtomicU64,
}

impl EventStoreStats {
    pub(super) fn record_replay_request(&self) {
        self.replay_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_replay_hit(&self) {
        self.replay_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_replay_miss(&self) {
        self.replay_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Take an immutable snapshot of the current replay counters.
    #[must_use]
    pub fn snapshot(&self) -> ReplayStats {
        let hits = self.replay_hits.load(Ordering::Relaxed);
        let misses = self.replay_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_ratio = if total == 0 { 0.0 } else { hits as f64 / total as f64 };

        ReplayStats { requests: self.replay_requests.load(Ordering::Relaxed), hits, misses, hit_ratio }
    }
}

/// A point-in-time read of [`EventStoreStats`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ReplayStats {
    /// Total `replay_events_after` calls since startup.
    pub requests: u64,
    /// Calls where `last_event_id` resolved to a known, authorized stream.
    pub hits: u64,
    /// Calls where `last_event_id` was absent, unknown, or access was denied.
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` if neither has occurred yet.
    pub hit_ratio: f64,
}
