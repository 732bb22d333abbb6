//! Circuit breaker guarding calls to external services (search API,
//! transcript fetcher, scrape fetch).
//!
//! Driven purely by an injected wall-clock function rather than internal
//! timers, so tests can advance time deterministically instead of sleeping.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::{config::CircuitBreakerConfig, Error};

/// Returns the current wall-clock time as epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_millis(&self) -> u64;
}

/// The real wall clock, backed by [`std::time::SystemTime`].
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        #[allow(clippy::cast_possible_truncation)]
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow through normally.
    Closed,
    /// Requests are rejected without invoking the protected function.
    Open,
    /// A single trial request is allowed through to test recovery.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// A point-in-time snapshot of a breaker's counters, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed in `CLOSED`.
    pub consecutive_failures: u32,
    /// Successes observed so far in the current `HALF_OPEN` trial.
    pub half_open_successes: u32,
    /// Number of times the breaker has tripped to `OPEN`.
    pub trips_count: u64,
}

type TransitionListener = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// A circuit breaker for one named external service.
pub struct CircuitBreaker {
    name: String,
    enabled: bool,
    failure_threshold: u32,
    half_open_max_attempts: u32,
    reset_timeout_ms: u64,
    clock: Box<dyn Clock>,
    state: RwLock<CircuitState>,
    failures: AtomicU32,
    half_open_successes: AtomicU32,
    last_state_change_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    trips_count: AtomicU64,
    listener: RwLock<Option<TransitionListener>>,
}

impl CircuitBreaker {
    /// Build a breaker using the real system clock.
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Box::new(SystemClock))
    }

    /// Build a breaker driven by a custom [`Clock`], for deterministic tests.
    #[must_use]
    pub fn with_clock(name: &str, config: &CircuitBreakerConfig, clock: Box<dyn Clock>) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let reset_timeout_ms = config.reset_timeout.as_millis() as u64;
        Self {
            name: name.to_string(),
            enabled: config.enabled,
            failure_threshold: config.failure_threshold,
            half_open_max_attempts: config.half_open_max_attempts,
            reset_timeout_ms,
            clock,
            state: RwLock::new(CircuitState::Closed),
            failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            last_state_change_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            trips_count: AtomicU64::new(0),
            listener: RwLock::new(None),
        }
    }

    /// Register a callback invoked on every state transition with
    /// `(from, to)`. Replaces any previously registered callback.
    pub fn on_transition<F>(&self, listener: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        *self.listener.write() = Some(Box::new(listener));
    }

    /// Run `f` through the breaker: rejects immediately with
    /// [`Error::CircuitOpen`] if the breaker won't let the call through,
    /// otherwise awaits `f` and records the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] if the breaker is open, or whatever
    /// error `f` itself produces.
    pub async fn execute<F, Fut, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::Result<T>>,
    {
        if !self.can_proceed() {
            return Err(self.open_error());
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if e.counts_as_breaker_failure() {
                    self.record_failure();
                }
                Err(e)
            }
        }
    }

    /// Force the breaker back to `CLOSED` and zero every counter.
    pub fn reset(&self) {
        self.failures.store(0, Ordering::Relaxed);
        self.half_open_successes.store(0, Ordering::Relaxed);
        *self.state.write() = CircuitState::Closed;
    }

    /// A snapshot of the breaker's current counters.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: *self.state.read(),
            consecutive_failures: self.failures.load(Ordering::Relaxed),
            half_open_successes: self.half_open_successes.load(Ordering::Relaxed),
            trips_count: self.trips_count.load(Ordering::Relaxed),
        }
    }

    /// Whether a call is currently allowed through. Transitions
    /// `OPEN -> HALF_OPEN` lazily when `reset_timeout` has elapsed since
    /// the last failure.
    pub fn can_proceed(&self) -> bool {
        if !self.enabled {
            return true;
        }

        match *self.state.read() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self.clock.now_millis().saturating_sub(self.last_failure_ms.load(Ordering::Relaxed));
                if elapsed >= self.reset_timeout_ms {
                    self.transition_to(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Milliseconds remaining until a `HALF_OPEN` probe is allowed, or `0`
    /// if not currently open (or already eligible).
    #[must_use]
    pub fn remaining_ms(&self) -> u64 {
        if *self.state.read() != CircuitState::Open {
            return 0;
        }
        let elapsed = self.clock.now_millis().saturating_sub(self.last_failure_ms.load(Ordering::Relaxed));
        self.reset_timeout_ms.saturating_sub(elapsed)
    }

    /// Build the structured error a blocked `execute` should return.
    #[must_use]
    pub fn open_error(&self) -> Error {
        Error::CircuitOpen { service: self.name.clone(), remaining_ms: self.remaining_ms() }
    }

    /// Record a success.
    pub fn record_success(&self) {
        if !self.enabled {
            return;
        }
        match *self.state.read() {
            CircuitState::Closed => self.failures.store(0, Ordering::Relaxed),
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.half_open_max_attempts {
                    self.transition_to(CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failure.
    pub fn record_failure(&self) {
        if !self.enabled {
            return;
        }
        self.last_failure_ms.store(self.clock.now_millis(), Ordering::Relaxed);

        match *self.state.read() {
            CircuitState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.failure_threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    fn transition_to(&self, new_state: CircuitState) {
        let old_state = {
            let mut state = self.state.write();
            if *state == new_state {
                return;
            }
            let old = *state;
            *state = new_state;
            old
        };
        self.last_state_change_ms.store(self.clock.now_millis(), Ordering::Relaxed);

        match new_state {
            CircuitState::Closed => {
                self.failures.store(0, Ordering::Relaxed);
                self.half_open_successes.store(0, Ordering::Relaxed);
                tracing::info!(service = %self.name, "circuit breaker closed");
            }
            CircuitState::Open => {
                self.trips_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(service = %self.name, "circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                self.half_open_successes.store(0, Ordering::Relaxed);
                tracing::debug!(service = %self.name, "circuit breaker half-open");
            }
        }

        if let Some(listener) = self.listener.read().as_ref() {
            listener(old_state, new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone)]
    struct FakeClock(Arc<AtomicU64>);

    impl FakeClock {
        fn new(start: u64) -> Self {
            Self(Arc::new(AtomicU64::new(start)))
        }

        fn set(&self, millis: u64) {
            self.0.store(millis, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn config(failure_threshold: u32, half_open_max_attempts: u32, reset_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig { enabled: true, failure_threshold, half_open_max_attempts, reset_timeout }
    }

    #[test]
    fn starts_closed_and_allows_requests() {
        let cb = CircuitBreaker::new("svc", &config(3, 2, Duration::from_secs(30)));
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_after_failure_threshold_reached() {
        let cb = CircuitBreaker::new("svc", &config(2, 2, Duration::from_secs(30)));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_proceed());
    }

    #[test]
    fn half_open_after_reset_timeout_elapses() {
        let clock = FakeClock::new(0);
        let cb = CircuitBreaker::with_clock("svc", &config(1, 1, Duration::from_secs(10)), Box::new(clock.clone()));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.set(9_999);
        assert!(!cb.can_proceed());

        clock.set(10_000);
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_enough_successes() {
        let clock = FakeClock::new(0);
        let cb = CircuitBreaker::with_clock("svc", &config(1, 2, Duration::from_millis(0)), Box::new(clock));
        cb.record_failure();
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_circuit() {
        let clock = FakeClock::new(0);
        let cb = CircuitBreaker::with_clock("svc", &config(1, 2, Duration::from_millis(0)), Box::new(clock));
        cb.record_failure();
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn remaining_ms_counts_down_from_reset_timeout() {
        let clock = FakeClock::new(0);
        let cb = CircuitBreaker::with_clock("svc", &config(1, 1, Duration::from_secs(10)), Box::new(clock));
        cb.record_failure();

        let err = cb.open_error();
        assert!(matches!(err, Error::CircuitOpen { remaining_ms, .. } if remaining_ms == 10_000));
    }

    #[test]
    fn disabled_breaker_always_allows() {
        let cb = CircuitBreaker::new("svc", &CircuitBreakerConfig { enabled: false, ..config(1, 1, Duration::from_secs(30)) });
        cb.record_failure();
        assert!(cb.can_proceed());
    }

    #[test]
    fn reset_forces_closed_and_zeroes_counters() {
        let cb = CircuitBreaker::new("svc", &config(1, 1, Duration::from_secs(30)));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 0);
    }

    #[test]
    fn full_lifecycle_matches_documented_transition_sequence() {
        let clock = FakeClock::new(0);
        let cb = CircuitBreaker::with_clock("svc", &config(2, 1, Duration::from_secs(10)), Box::new(clock.clone()));
        let seen: Arc<parking_lot::Mutex<Vec<(CircuitState, CircuitState)>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        cb.on_transition(move |from, to| recorder.lock().push((from, to)));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.set(3_000);
        let err = cb.open_error();
        assert!(matches!(err, Error::CircuitOpen { remaining_ms, .. } if remaining_ms == 7_000));
        assert!(!cb.can_proceed());

        clock.set(10_000);
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        assert_eq!(
            *seen.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn transition_listener_observes_from_and_to() {
        let seen: Arc<parking_lot::Mutex<Vec<(CircuitState, CircuitState)>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let cb = CircuitBreaker::new("svc", &config(1, 1, Duration::from_secs(30)));
        let recorder = seen.clone();
        cb.on_transition(move |from, to| recorder.lock().push((from, to)));

        cb.record_failure();
        assert_eq!(*seen.lock(), vec![(CircuitState::Closed, CircuitState::Open)]);
    }

    #[tokio::test]
    async fn execute_rejects_without_invoking_when_open() {
        let cb = CircuitBreaker::new("svc", &config(1, 1, Duration::from_secs(30)));
        cb.record_failure();

        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_clone = called.clone();
        let result: crate::Result<()> = cb
            .execute(|| async move {
                called_clone.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn execute_records_failure_only_for_breaker_counted_errors() {
        let cb = CircuitBreaker::new("svc", &config(1, 1, Duration::from_secs(30)));
        let result: crate::Result<()> = cb.execute(|| async { Err(Error::InvalidUrl("bad".into())) }).await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);

        let result: crate::Result<()> = cb.execute(|| async { Err(Error::Timeout("slow".into())) }).await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
