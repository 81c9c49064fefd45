//! Retry with exponential backoff.
//!
//! The policy is a plain value: attempts, initial delay, delay cap, and a
//! backoff multiplier. [`with_retry_if`] threads a predicate through so call
//! sites can refuse to retry errors that will never succeed (validation-type
//! failures), while [`with_retry`] retries everything.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Backoff parameters for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts performed, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound applied to every delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with a constant inter-attempt delay (multiplier 1.0).
    ///
    /// Used for connect attempts, where the remote endpoint is either up or
    /// not and backing off further buys nothing.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    /// Next delay after a failure, capped at `max_delay`.
    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_multiplier).min(self.max_delay)
    }
}

/// All attempts exhausted, or the error was classified as not retryable.
///
/// Wraps the last underlying error rather than a generic message so the
/// caller can still match on the real failure.
#[derive(Debug, Error)]
#[error("operation failed after {attempts} attempt(s): {source}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Attempts performed before giving up.
    pub attempts: u32,
    /// The last underlying error.
    #[source]
    pub source: E,
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Consume the wrapper and return the last underlying error.
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Retry `operation` per `policy`, treating every error as retryable.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    with_retry_if(policy, |_| true, operation).await
}

/// Retry `operation` per `policy` while `retry_condition` accepts the error.
///
/// A rejected error fails immediately with the attempt count performed so
/// far; there is no point sleeping before an error that cannot succeed.
pub async fn with_retry_if<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    retry_condition: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::error::Error + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay.min(policy.max_delay);
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if attempt >= max_attempts || !retry_condition(&error) {
                    return Err(RetryError {
                        attempts: attempt,
                        source: error,
                    });
                }
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
                attempt += 1;
            }
        }
    }
}
