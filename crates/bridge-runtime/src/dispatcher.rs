//! # Engine Dispatcher
//!
//! The end-to-end dispatch path: advisory conflict check → queue admission
//! (priority + concurrency cap) → circuit breaker → transient-only retry →
//! pooled `send_command`. This is the single surface the tool-facing
//! collaborators call; everything behind it is injected by the container.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use bridge_protocol::{ConnectionPool, ProtocolError};
use bridge_queue::{AddOptions, QueueError, QueueStats, ResourceAwareQueue};
use bridge_resilience::{with_retry_if, CircuitBreaker, RetryPolicy};

/// Per-dispatch options.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Queue priority; higher is admitted first.
    pub priority: i32,
    /// Pending-state deadline; falls back to the configured default.
    pub timeout: Option<Duration>,
    /// Logical resources this command touches (advisory).
    pub resources: Vec<String>,
}

/// Composes the queue, pool, breaker, and retry policy into one call path.
#[derive(Clone)]
pub struct EngineDispatcher {
    endpoint: String,
    command_timeout: Duration,
    default_operation_timeout: Option<Duration>,
    pool: Arc<ConnectionPool>,
    queue: Arc<ResourceAwareQueue>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl EngineDispatcher {
    /// Assemble a dispatcher over already-constructed components.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        endpoint: String,
        command_timeout: Duration,
        default_operation_timeout: Option<Duration>,
        pool: Arc<ConnectionPool>,
        queue: Arc<ResourceAwareQueue>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            endpoint,
            command_timeout,
            default_operation_timeout,
            pool,
            queue,
            breaker,
            retry,
        }
    }

    /// Dispatch one engine command through the full pipeline and await its
    /// result.
    ///
    /// Holders of any resource named in `options.resources` are logged
    /// before submission; conflict avoidance stays the caller's decision.
    ///
    /// # Errors
    ///
    /// Queue-level rejections surface as their [`QueueError`] variant; an
    /// executed command's failure arrives as [`QueueError::Operation`]
    /// wrapping the breaker/retry/protocol error chain.
    pub async fn execute(
        &self,
        command: &str,
        params: Value,
        options: DispatchOptions,
    ) -> Result<Value, QueueError> {
        let conflicts = self.queue.get_conflicting_operations(&options.resources);
        if !conflicts.is_empty() {
            warn!(
                command,
                contested = conflicts.len(),
                resources = ?options.resources,
                "resources held by in-flight operations; submitting anyway"
            );
        }

        let pool = Arc::clone(&self.pool);
        let breaker = Arc::clone(&self.breaker);
        let retry = self.retry.clone();
        let endpoint = self.endpoint.clone();
        let command = command.to_owned();
        let command_timeout = self.command_timeout;

        let add_options = AddOptions {
            priority: options.priority,
            timeout: options.timeout.or(self.default_operation_timeout),
        };

        self.queue
            .add_with_resource_lock(
                move || async move {
                    let outcome = breaker
                        .call(|| {
                            with_retry_if(&retry, ProtocolError::is_transient, || {
                                let pool = Arc::clone(&pool);
                                let endpoint = endpoint.clone();
                                let command = command.clone();
                                let params = params.clone();
                                async move {
                                    let connection = pool.get_connection(&endpoint).await?;
                                    connection
                                        .send_command_with_timeout(
                                            &command,
                                            params,
                                            command_timeout,
                                        )
                                        .await
                                }
                            })
                        })
                        .await;
                    outcome.map_err(anyhow::Error::from)
                },
                options.resources,
                add_options,
            )
            .await
    }

    /// Queue counters, for the health-reporting collaborator.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}
