//! Retry timing and circuit breaker transitions under concurrency.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use bridge_resilience::{
        with_retry, with_retry_if, BreakerError, CircuitBreaker, CircuitBreakerConfig,
        CircuitState, RetryPolicy,
    };

    #[derive(Debug, thiserror::Error)]
    #[error("engine unavailable")]
    struct Unavailable;

    /// max_attempts=3, initial_delay=100ms, multiplier=2 against an
    /// always-failing operation: exactly 3 attempts, inter-attempt gaps of
    /// ~100ms then ~200ms, and the error reports attempts=3.
    #[tokio::test]
    async fn test_retry_performs_three_attempts_with_growing_gaps() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let stamps: Arc<std::sync::Mutex<Vec<Instant>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));

        let counting = Arc::clone(&attempts);
        let stamping = Arc::clone(&stamps);
        let result: Result<(), _> = with_retry(&policy, move || {
            counting.fetch_add(1, Ordering::SeqCst);
            stamping.lock().unwrap().push(Instant::now());
            async { Err(Unavailable) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let stamps = stamps.lock().unwrap();
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(first_gap >= Duration::from_millis(90), "first gap {first_gap:?}");
        assert!(first_gap < Duration::from_millis(180), "first gap {first_gap:?}");
        assert!(second_gap >= Duration::from_millis(180), "second gap {second_gap:?}");
        assert!(second_gap < Duration::from_millis(350), "second gap {second_gap:?}");
    }

    /// A non-retryable error fails on the first attempt even with retries
    /// left in the budget.
    #[tokio::test]
    async fn test_retry_condition_short_circuits() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry_if(&policy, |_: &Unavailable| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Unavailable) }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// After the failure threshold, the next call fails fast without
    /// invoking the wrapped operation.
    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_invoking() {
        let breaker = CircuitBreaker::new(
            "engine",
            CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(60),
            },
        );
        for _ in 0..3 {
            let _ = breaker.call(|| async { Err::<(), _>(Unavailable) }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), BreakerError<Unavailable>> = breaker
            .call(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    /// After the recovery timeout, exactly one call is admitted as the
    /// half-open probe regardless of how many callers race for it.
    #[tokio::test]
    async fn test_exactly_one_probe_under_concurrent_callers() {
        let breaker = Arc::new(CircuitBreaker::new(
            "engine",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(30),
            },
        ));
        let _ = breaker.call(|| async { Err::<(), _>(Unavailable) }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let invoked = Arc::new(AtomicU32::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let breaker = Arc::clone(&breaker);
            let invoked = Arc::clone(&invoked);
            tasks.push(tokio::spawn(async move {
                breaker
                    .call(move || {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::time::sleep(Duration::from_millis(40)).await;
                            Ok::<_, Unavailable>(())
                        }
                    })
                    .await
            }));
        }

        let mut admitted = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => admitted += 1,
                Err(BreakerError::Open { .. }) => rejected += 1,
                Err(BreakerError::Operation(_)) => panic!("operation should not fail"),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(rejected, 7);
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// A failed probe reopens the circuit and refreshes the cooldown.
    #[tokio::test]
    async fn test_failed_probe_restarts_cooldown() {
        let breaker = CircuitBreaker::new(
            "engine",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_millis(40),
            },
        );
        let _ = breaker.call(|| async { Err::<(), _>(Unavailable) }).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = breaker.call(|| async { Err::<(), _>(Unavailable) }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Cooldown restarted: still open immediately after the failed probe.
        let result: Result<(), BreakerError<Unavailable>> =
            breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }
}
