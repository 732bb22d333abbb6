//! Per-tool call metrics: duration, success/failure, cache-hit tracking,
//! and reservoir-sampled latency percentiles.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;

/// One tool invocation's outcome, as reported to [`ToolMetrics::record`].
#[derive(Debug, Clone, Copy)]
pub struct CallOutcome {
    /// Wall-clock duration of the call.
    pub duration: Duration,
    /// Whether the call succeeded.
    pub success: bool,
    /// Whether the result was served from cache.
    pub cache_hit: bool,
}

struct State {
    calls: u64,
    successes: u64,
    failures: u64,
    cache_hits: u64,
    cache_misses: u64,
    last_called_at: Option<DateTime<Utc>>,
    reservoir: Vec<Duration>,
    seen: usize,
}

/// Latency and outcome tracking for a single named tool.
pub struct ToolMetrics {
    reservoir_size: usize,
    state: Mutex<State>,
}

/// A point-in-time snapshot of a tool's metrics, suitable for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total calls recorded.
    pub calls: u64,
    /// Calls that succeeded.
    pub successes: u64,
    /// Calls that failed.
    pub failures: u64,
    /// `successes / calls`, or `0.0` if there have been no calls.
    pub success_rate: f64,
    /// 50th percentile latency in milliseconds.
    pub p50_ms: f64,
    /// 95th percentile latency in milliseconds.
    pub p95_ms: f64,
    /// 99th percentile latency in milliseconds.
    pub p99_ms: f64,
    /// Mean latency in milliseconds.
    pub avg_ms: f64,
    /// Minimum observed latency in milliseconds.
    pub min_ms: f64,
    /// Maximum observed latency in milliseconds.
    pub max_ms: f64,
    /// Calls served from cache.
    pub cache_hits: u64,
    /// Calls that missed the cache.
    pub cache_misses: u64,
    /// `cache_hits / (cache_hits + cache_misses)`, or `0.0` if neither occurred.
    pub cache_hit_ratio: f64,
    /// Timestamp of the most recent call, if any.
    pub last_called_at: Option<DateTime<Utc>>,
}

impl ToolMetrics {
    /// Build a metrics tracker bounding its latency reservoir to
    /// `reservoir_size` samples.
    #[must_use]
    pub fn new(reservoir_size: usize) -> Self {
        Self {
            reservoir_size: reservoir_size.max(1),
            state: Mutex::new(State {
                calls: 0,
                successes: 0,
                failures: 0,
                cache_hits: 0,
                cache_misses: 0,
                last_called_at: None,
                reservoir: Vec::new(),
                seen: 0,
            }),
        }
    }

    /// Record one call's outcome.
    pub fn record(&self, outcome: CallOutcome) {
        let mut state = self.state.lock();
        state.calls += 1;
        if outcome.success {
            state.successes += 1;
        } else {
            state.failures += 1;
        }
        if outcome.cache_hit {
            state.cache_hits += 1;
        } else {
            state.cache_misses += 1;
        }
        state.last_called_at = Some(Utc::now());

        // Algorithm R (reservoir sampling).
        state.seen += 1;
        if state.reservoir.len() < self.reservoir_size {
            state.reservoir.push(outcome.duration);
        } else {
            let j = rand::rng().random_range(0..state.seen);
            if j < self.reservoir_size {
                state.reservoir[j] = outcome.duration;
            }
        }
    }

    /// A point-in-time snapshot of every tracked statistic.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let mut samples: Vec<f64> = state.reservoir.iter().map(Duration::as_secs_f64).map(|s| s * 1000.0).collect();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let percentile = |p: f64| -> f64 {
            if samples.is_empty() {
                return 0.0;
            }
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = ((p * samples.len() as f64).ceil() as usize).saturating_sub(1).min(samples.len() - 1);
            samples[idx]
        };

        #[allow(clippy::cast_precision_loss)]
        let avg = if samples.is_empty() { 0.0 } else { samples.iter().sum::<f64>() / samples.len() as f64 };
        let min = samples.first().copied().unwrap_or(0.0);
        let max = samples.last().copied().unwrap_or(0.0);

        #[allow(clippy::cast_precision_loss)]
        let success_rate = if state.calls == 0 { 0.0 } else { state.successes as f64 / state.calls as f64 };
        let cache_total = state.cache_hits + state.cache_misses;
        #[allow(clippy::cast_precision_loss)]
        let cache_hit_ratio = if cache_total == 0 { 0.0 } else { state.cache_hits as f64 / cache_total as f64 };

        MetricsSnapshot {
            calls: state.calls,
            successes: state.successes,
            failures: state.failures,
            success_rate,
            p50_ms: percentile(0.50),
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
            avg_ms: avg,
            min_ms: min,
            max_ms: max,
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            cache_hit_ratio,
            last_called_at: state.last_called_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_failure_and_cache_counters() {
        let metrics = ToolMetrics::new(100);
        metrics.record(CallOutcome { duration: Duration::from_millis(10), success: true, cache_hit: true });
        metrics.record(CallOutcome { duration: Duration::from_millis(20), success: false, cache_hit: false });

        let snap = metrics.snapshot();
        assert_eq!(snap.calls, 2);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 1);
        assert!((snap.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert!((snap.cache_hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_metrics_snapshot_has_zeroed_stats() {
        let metrics = ToolMetrics::new(10);
        let snap = metrics.snapshot();
        assert_eq!(snap.calls, 0);
        assert!((snap.success_rate).abs() < f64::EPSILON);
        assert!((snap.cache_hit_ratio).abs() < f64::EPSILON);
        assert!(snap.last_called_at.is_none());
    }

    #[test]
    fn percentiles_reflect_observed_latencies() {
        let metrics = ToolMetrics::new(100);
        for ms in [10, 20, 30, 40, 50, 60, 70, 80, 90, 100] {
            metrics.record(CallOutcome { duration: Duration::from_millis(ms), success: true, cache_hit: false });
        }
        let snap = metrics.snapshot();
        assert!((snap.min_ms - 10.0).abs() < 1e-6);
        assert!((snap.max_ms - 100.0).abs() < 1e-6);
        assert!(snap.p50_ms > 0.0 && snap.p50_ms <= snap.p95_ms);
        assert!(snap.p95_ms <= snap.p99_ms);
    }

    #[test]
    fn reservoir_never_grows_past_its_configured_size() {
        let metrics = ToolMetrics::new(5);
        for ms in 0..50 {
            metrics.record(CallOutcome { duration: Duration::from_millis(ms), success: true, cache_hit: false });
        }
        assert_eq!(metrics.state.lock().reservoir.len(), 5);
        assert_eq!(metrics.snapshot().calls, 50);
    }

    #[test]
    fn last_called_at_updates_on_every_record() {
        let metrics = ToolMetrics::new(10);
        metrics.record(CallOutcome { duration: Duration::from_millis(1), success: true, cache_hit: false });
        assert!(metrics.snapshot().last_called_at.is_some());
    }
}
