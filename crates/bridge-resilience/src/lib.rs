//! # Bridge Resilience
//!
//! Failure-handling primitives shared by the connection and dispatch layers:
//!
//! - [`RetryPolicy`] / [`with_retry`] / [`with_retry_if`]: exponential backoff
//!   around a fallible async operation, filtered by a retryable-error
//!   predicate. Exhausted retries surface the *last underlying error* together
//!   with the attempt count, so callers can distinguish a real failure from
//!   the act of retrying.
//! - [`CircuitBreaker`]: consecutive-failure tracking for a named operation
//!   class. Opens to fail fast after a threshold, half-opens after a cooldown
//!   to probe recovery with exactly one call.
//!
//! Both primitives are policy-only: they never decide *which* errors are
//! transient. That classification lives with the error type at the call site.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{with_retry, with_retry_if, RetryError, RetryPolicy};
