//! Circuit breaker for a named class of engine calls.
//!
//! State machine:
//!
//! ```text
//! [Closed] --failures reach threshold--> [Open]
//! [Open]   --recovery timeout elapses--> [HalfOpen] (next caller probes)
//! [HalfOpen] --probe succeeds--> [Closed]
//! [HalfOpen] --probe fails----> [Open]
//! ```
//!
//! While half-open, exactly one probe call is admitted regardless of how many
//! callers arrive concurrently; the rest fail fast with [`BreakerError::Open`].

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Thresholds for opening and re-closing the circuit.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Cooldown before a half-open probe is admitted.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// One probe call is in flight (or about to be admitted).
    HalfOpen,
}

/// Error surfaced by [`CircuitBreaker::call`].
///
/// `Open` is deliberately a distinct variant from the wrapped operation error
/// so callers can apply different backoff and alerting to fail-fast
/// rejections than to real failures.
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error + 'static,
{
    /// The circuit is open; the operation was never invoked.
    #[error("circuit '{name}' is open, failing fast")]
    Open {
        /// Name of the guarded operation class.
        name: String,
    },
    /// The operation ran and failed.
    #[error(transparent)]
    Operation(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// Set while the single half-open probe is outstanding.
    probe_in_flight: bool,
}

/// Consecutive-failure circuit breaker for one named operation class.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for the named operation class.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state, transitioning open -> half-open if the cooldown elapsed.
    ///
    /// Read-only observation: the half-open transition itself happens when a
    /// caller is admitted, so this reports `Open` with an elapsed cooldown as
    /// `HalfOpen` without mutating anything.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if self.cooldown_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Run `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// [`BreakerError::Open`] without invoking the operation when the circuit
    /// is open (or another half-open probe is outstanding);
    /// [`BreakerError::Operation`] when the operation itself fails.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let probing = match self.admit() {
            Admission::Reject => {
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                })
            }
            Admission::Probe => true,
            Admission::Pass => false,
        };

        match operation().await {
            Ok(value) => {
                self.record_success(probing);
                Ok(value)
            }
            Err(error) => {
                self.record_failure(probing);
                Err(BreakerError::Operation(error))
            }
        }
    }

    /// Admission decision for the next call.
    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::Open => {
                if self.cooldown_elapsed(&inner) {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    debug!(circuit = %self.name, "cooldown elapsed, admitting half-open probe");
                    Admission::Probe
                } else {
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Reject
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    fn record_success(&self, probing: bool) {
        let mut inner = self.lock();
        if probing {
            debug!(circuit = %self.name, "probe succeeded, closing circuit");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    fn record_failure(&self, probing: bool) {
        let mut inner = self.lock();
        if probing {
            inner.state = CircuitState::Open;
            inner.last_failure = Some(Instant::now());
            inner.probe_in_flight = false;
            warn!(circuit = %self.name, "probe failed, reopening circuit");
            return;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        if inner.state == CircuitState::Closed
            && inner.failure_count >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.last_failure = Some(Instant::now());
            warn!(
                circuit = %self.name,
                failures = inner.failure_count,
                "failure threshold reached, opening circuit"
            );
        }
    }

    fn cooldown_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .last_failure
            .is_some_and(|at| at.elapsed() > self.config.recovery_timeout)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Inner updates cannot panic, so poisoning is unreachable; recover
        // rather than propagate.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Outcome of the admission check.
enum Admission {
    /// Closed circuit, normal pass-through.
    Pass,
    /// This call is the single half-open probe.
    Probe,
    /// Fail fast without invoking the operation.
    Reject,
}
