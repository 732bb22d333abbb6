//! Cache statistics snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters exposed as a point-in-time snapshot.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    persistence_errors: AtomicU64,
}

impl CacheStats {
    pub(super) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_eviction(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a `compute_fn` failure on a cache miss or revalidation.
    pub(super) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take an immutable snapshot of the current counters.
    #[must_use]
    pub fn snapshot(&self, size: usize, pending: usize) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_ratio = if total == 0 { 0.0 } else { hits as f64 / total as f64 };

        CacheStatsSnapshot {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            size,
            pending,
            hit_ratio,
        }
    }
}

/// A point-in-time read of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Cache hits (fresh or stale-but-servable) since startup.
    pub hits: u64,
    /// Cache misses (required a `compute_fn` call) since startup.
    pub misses: u64,
    /// Entries evicted by the LRU policy since startup.
    pub evictions: u64,
    /// Failed `compute_fn` invocations since startup.
    pub errors: u64,
    /// Failed disk persistence operations since startup.
    pub persistence_errors: u64,
    /// Current number of entries held in memory.
    pub size: usize,
    /// Computations currently in flight, coalescing concurrent callers.
    pub pending: usize,
    /// `hits / (hits + misses)`, `0.0` if neither has occurred yet.
    pub hit_ratio: f64,
}
