//! # Bridge Container
//!
//! Explicit construction and ownership of every bridge component. The
//! container is built once by the server bootstrap and passed by reference
//! to whatever consumes the dispatch surface — there are no module-level
//! singletons anywhere in the bridge.

use std::sync::Arc;

use tracing::info;

use bridge_protocol::ConnectionPool;
use bridge_queue::ResourceAwareQueue;
use bridge_resilience::{CircuitBreaker, RetryPolicy};

use crate::config::BridgeConfig;
use crate::dispatcher::EngineDispatcher;

/// Breaker name for the engine command class.
const ENGINE_CIRCUIT: &str = "engine.send_command";

/// Owns the pool, queue, breaker, and retry policy for one bridge process.
pub struct BridgeContainer {
    config: BridgeConfig,
    pool: Arc<ConnectionPool>,
    queue: Arc<ResourceAwareQueue>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl BridgeContainer {
    /// Construct every component from the validated configuration.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            config.pool.pool_config(),
            config.engine.connection_config(),
        ));
        let queue = Arc::new(ResourceAwareQueue::new(
            config.queue.max_concurrent_operations,
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            ENGINE_CIRCUIT,
            config.resilience.breaker_config(),
        ));
        let retry = config.resilience.retry_policy();

        info!(
            endpoint = %config.engine.endpoint(),
            max_concurrent = config.queue.max_concurrent_operations,
            pool_capacity = config.pool.max_connections,
            "bridge container initialized"
        );

        Self {
            config,
            pool,
            queue,
            breaker,
            retry,
        }
    }

    /// The configuration this container was built from.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Shared connection pool.
    pub fn pool(&self) -> Arc<ConnectionPool> {
        Arc::clone(&self.pool)
    }

    /// Shared operation queue.
    pub fn queue(&self) -> Arc<ResourceAwareQueue> {
        Arc::clone(&self.queue)
    }

    /// Shared engine circuit breaker.
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Build the dispatch surface consumed by tool-facing collaborators.
    #[must_use]
    pub fn dispatcher(&self) -> EngineDispatcher {
        EngineDispatcher::new(
            self.config.engine.endpoint(),
            self.config.engine.connection_config().command_timeout,
            Some(self.config.queue.operation_timeout()),
            Arc::clone(&self.pool),
            Arc::clone(&self.queue),
            Arc::clone(&self.breaker),
            self.retry.clone(),
        )
    }

    /// Graceful shutdown: reject queued work, then close every connection.
    ///
    /// Operations already processing settle naturally; nothing in-flight
    /// against the engine is aborted.
    pub async fn shutdown(&self) {
        info!("initiating graceful shutdown");
        let cleared = self.queue.clear();
        self.pool.close_all().await;
        info!(cleared, "shutdown complete");
    }
}
