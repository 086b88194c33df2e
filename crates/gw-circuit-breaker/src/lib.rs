//! Three-state circuit breaker guarding any failure-prone call (spec §4.2).
//!
//! ```text
//! CLOSED --[consecutive failures reach failure_threshold]--> OPEN
//! CLOSED --[success]--> CLOSED (failure count reset)
//! OPEN   --[timeout elapsed, call attempted]--> HALF_OPEN (one probe admitted)
//! HALF_OPEN --[success count reaches success_threshold]--> CLOSED
//! HALF_OPEN --[any failure]--> OPEN
//! ```

use std::time::{Duration, Instant};

use gw_primitives::{Classify, ErrorKind};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A read-only view of breaker state for metrics export.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit is open")]
    CircuitOpen,
    #[error(transparent)]
    Inner(E),
}

impl<E> Classify for CircuitBreakerError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            CircuitBreakerError::CircuitOpen => ErrorKind::CircuitOpen,
            CircuitBreakerError::Inner(_) => ErrorKind::NetworkError,
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    // Only one probe is admitted per OPEN->HALF_OPEN transition; this
    // flags that the transition has already happened for the current
    // open period so a flood of concurrent callers doesn't all get in.
    half_open_probe_in_flight: bool,
    last_failure: Option<Instant>,
}

/// Guards a single failure-prone operation. Cheap to clone via `Arc`;
/// state transitions are serialized behind a `parking_lot::Mutex`
/// rather than atomics, since a transition touches several fields at
/// once and must be observed consistently.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Returned by [`CircuitBreaker::try_acquire`]; drop (or call
/// [`Permit::record_success`] / [`Permit::record_failure`]) to report the
/// outcome of the call it was acquired for.
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    reported: bool,
}

impl<'a> Permit<'a> {
    pub fn record_success(mut self) {
        self.breaker.record_success();
        self.reported = true;
    }

    pub fn record_failure(mut self) {
        self.breaker.record_failure();
        self.reported = true;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.reported {
            // Caller dropped the permit without reporting (e.g. a
            // cancelled future); treat as a failure so a breaker can't
            // be starved open by a flood of cancellations.
            self.breaker.record_failure();
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_probe_in_flight: false,
                last_failure: None,
            }),
        }
    }

    /// Checks out a permit for one call, or fails fast with
    /// [`CircuitBreakerError::CircuitOpen`] without invoking anything.
    /// Reading state here may itself drive the OPEN -> HALF_OPEN
    /// transition once `timeout` has elapsed since the last failure.
    pub fn try_acquire<E>(&self) -> Result<Permit<'_>, CircuitBreakerError<E>> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit { breaker: self, reported: false }),
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    Err(CircuitBreakerError::CircuitOpen)
                } else {
                    inner.half_open_probe_in_flight = true;
                    Ok(Permit { breaker: self, reported: false })
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_probe_in_flight = true;
                    tracing::debug!("circuit breaker OPEN -> HALF_OPEN, admitting probe");
                    Ok(Permit { breaker: self, reported: false })
                } else {
                    Err(CircuitBreakerError::CircuitOpen)
                }
            }
        }
    }

    /// Runs `f` if the breaker admits a call, recording the outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        match f().await {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(e) => {
                permit.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_probe_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    tracing::debug!("circuit breaker HALF_OPEN -> CLOSED");
                }
            }
            CircuitState::Open => {
                // A late success for a call issued before the breaker
                // opened; state already moved on, ignore.
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::debug!("circuit breaker CLOSED -> OPEN");
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_probe_in_flight = false;
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
                tracing::debug!("circuit breaker HALF_OPEN -> OPEN");
            }
            CircuitState::Open => {}
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig { failure_threshold, success_threshold, timeout })
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = breaker(3, 1, Duration::from_secs(60));
        for _ in 0..2 {
            cb.try_acquire::<()>().unwrap().record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.try_acquire::<()>().unwrap().record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let cb = breaker(3, 1, Duration::from_secs(60));
        cb.try_acquire::<()>().unwrap().record_failure();
        cb.try_acquire::<()>().unwrap().record_failure();
        cb.try_acquire::<()>().unwrap().record_success();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn open_fails_fast_until_timeout_elapses() {
        let cb = breaker(1, 1, Duration::from_millis(20));
        cb.try_acquire::<()>().unwrap().record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.try_acquire::<()>(), Err(CircuitBreakerError::CircuitOpen)));

        std::thread::sleep(Duration::from_millis(30));
        let permit = cb.try_acquire::<()>().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        permit.record_success();
    }

    #[test]
    fn half_open_admits_only_one_probe_at_a_time() {
        let cb = breaker(1, 2, Duration::from_millis(1));
        cb.try_acquire::<()>().unwrap().record_failure();
        std::thread::sleep(Duration::from_millis(5));

        let probe = cb.try_acquire::<()>().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(matches!(cb.try_acquire::<()>(), Err(CircuitBreakerError::CircuitOpen)));
        probe.record_success();
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = breaker(1, 2, Duration::from_millis(1));
        cb.try_acquire::<()>().unwrap().record_failure();
        std::thread::sleep(Duration::from_millis(5));

        cb.try_acquire::<()>().unwrap().record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.try_acquire::<()>().unwrap().record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker(1, 2, Duration::from_millis(1));
        cb.try_acquire::<()>().unwrap().record_failure();
        std::thread::sleep(Duration::from_millis(5));

        cb.try_acquire::<()>().unwrap().record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn call_wraps_future_outcome() {
        let cb = breaker(2, 1, Duration::from_secs(60));
        let ok: Result<u32, &str> = cb.call(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32, &str> = cb.call(|| async { Err("boom") }).await;
        assert!(matches!(err, Err(CircuitBreakerError::Inner("boom"))));
    }

    #[test]
    fn dropping_a_permit_without_reporting_counts_as_failure() {
        let cb = breaker(1, 1, Duration::from_secs(60));
        {
            let _permit = cb.try_acquire::<()>().unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
