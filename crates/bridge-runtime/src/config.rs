//! # Bridge Configuration
//!
//! Unified configuration for the connection, pool, queue, and resilience
//! layers. Every field has a sane default; `EB_*` environment variables
//! override individual values, and `validate()` rejects combinations that
//! cannot serve traffic.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use bridge_protocol::{ConnectionConfig, PoolConfig};
use bridge_resilience::{CircuitBreakerConfig, RetryPolicy};

/// Complete bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Engine endpoint and per-connection timeouts.
    pub engine: EngineSettings,
    /// Connection pool limits.
    pub pool: PoolSettings,
    /// Operation queue limits.
    pub queue: QueueSettings,
    /// Retry and circuit breaker thresholds.
    pub resilience: ResilienceSettings,
}

impl BridgeConfig {
    /// Defaults overridden by any `EB_*` environment variables present.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("EB_ENGINE_HOST") {
            config.engine.host = host;
        }
        override_from_env(&mut config.engine.port, "EB_ENGINE_PORT");
        override_from_env(&mut config.engine.connect_timeout_ms, "EB_CONNECT_TIMEOUT_MS");
        override_from_env(
            &mut config.engine.max_connect_attempts,
            "EB_MAX_CONNECT_ATTEMPTS",
        );
        override_from_env(
            &mut config.engine.connect_retry_delay_ms,
            "EB_CONNECT_RETRY_DELAY_MS",
        );
        override_from_env(&mut config.engine.command_timeout_ms, "EB_COMMAND_TIMEOUT_MS");

        override_from_env(&mut config.pool.max_connections, "EB_POOL_MAX_CONNECTIONS");
        override_from_env(&mut config.pool.idle_timeout_secs, "EB_POOL_IDLE_TIMEOUT_SECS");
        override_from_env(
            &mut config.pool.sweep_interval_secs,
            "EB_POOL_SWEEP_INTERVAL_SECS",
        );

        override_from_env(
            &mut config.queue.max_concurrent_operations,
            "EB_MAX_CONCURRENT_OPS",
        );
        override_from_env(&mut config.queue.operation_timeout_ms, "EB_OPERATION_TIMEOUT_MS");

        override_from_env(
            &mut config.resilience.failure_threshold,
            "EB_BREAKER_FAILURE_THRESHOLD",
        );
        override_from_env(
            &mut config.resilience.recovery_timeout_secs,
            "EB_BREAKER_RECOVERY_TIMEOUT_SECS",
        );
        override_from_env(&mut config.resilience.retry_max_attempts, "EB_RETRY_MAX_ATTEMPTS");
        override_from_env(
            &mut config.resilience.retry_initial_delay_ms,
            "EB_RETRY_INITIAL_DELAY_MS",
        );
        override_from_env(
            &mut config.resilience.retry_max_delay_ms,
            "EB_RETRY_MAX_DELAY_MS",
        );
        override_from_env(
            &mut config.resilience.retry_backoff_multiplier,
            "EB_RETRY_BACKOFF_MULTIPLIER",
        );

        config
    }

    /// Reject configurations that cannot serve traffic.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.host.is_empty() {
            return Err(ConfigError::MissingEngineHost);
        }
        if self.engine.port == 0 {
            return Err(ConfigError::ZeroEnginePort);
        }
        if self.engine.max_connect_attempts == 0 {
            return Err(ConfigError::ZeroConnectAttempts);
        }
        if self.pool.max_connections == 0 {
            return Err(ConfigError::ZeroPoolCapacity);
        }
        if self.queue.max_concurrent_operations == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.resilience.retry_backoff_multiplier < 1.0 {
            return Err(ConfigError::BackoffBelowOne(
                self.resilience.retry_backoff_multiplier,
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Engine host is empty.
    MissingEngineHost,
    /// Engine port is zero.
    ZeroEnginePort,
    /// Connect attempts must include at least the first try.
    ZeroConnectAttempts,
    /// The pool must admit at least one connection.
    ZeroPoolCapacity,
    /// The queue must admit at least one operation.
    ZeroConcurrency,
    /// A backoff multiplier below one shrinks delays.
    BackoffBelowOne(f64),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingEngineHost => write!(f, "EB_ENGINE_HOST must not be empty"),
            ConfigError::ZeroEnginePort => write!(f, "EB_ENGINE_PORT must be non-zero"),
            ConfigError::ZeroConnectAttempts => {
                write!(f, "EB_MAX_CONNECT_ATTEMPTS must be at least 1")
            }
            ConfigError::ZeroPoolCapacity => {
                write!(f, "EB_POOL_MAX_CONNECTIONS must be at least 1")
            }
            ConfigError::ZeroConcurrency => {
                write!(f, "EB_MAX_CONCURRENT_OPS must be at least 1")
            }
            ConfigError::BackoffBelowOne(value) => {
                write!(f, "EB_RETRY_BACKOFF_MULTIPLIER must be >= 1.0 (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Engine endpoint and connection timeouts.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Engine host.
    pub host: String,
    /// Engine command port.
    pub port: u16,
    /// Deadline for a single connect attempt, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Connect attempts before giving up (including the first).
    pub max_connect_attempts: u32,
    /// Fixed delay between connect attempts, in milliseconds.
    pub connect_retry_delay_ms: u64,
    /// Default command round-trip deadline, in milliseconds.
    pub command_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6400,
            connect_timeout_ms: 10_000,
            max_connect_attempts: 3,
            connect_retry_delay_ms: 1_000,
            command_timeout_ms: 30_000,
        }
    }
}

impl EngineSettings {
    /// `host:port` pool key.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings as the protocol layer's connection config.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_connect_attempts: self.max_connect_attempts,
            connect_retry_delay: Duration::from_millis(self.connect_retry_delay_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }
}

/// Connection pool limits.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum simultaneously pooled endpoints.
    pub max_connections: usize,
    /// Idle seconds after which an unused connection is retired.
    pub idle_timeout_secs: u64,
    /// Background sweep interval in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 4,
            idle_timeout_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl PoolSettings {
    /// Settings as the protocol layer's pool config.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.max_connections,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

/// Operation queue limits.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Operations allowed in flight against the engine at once.
    pub max_concurrent_operations: usize,
    /// Default pending-state deadline per operation, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 4,
            operation_timeout_ms: 60_000,
        }
    }
}

impl QueueSettings {
    /// Default per-operation pending timeout.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Retry and circuit breaker thresholds.
#[derive(Debug, Clone)]
pub struct ResilienceSettings {
    /// Consecutive failures that open the engine circuit.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before a half-open probe.
    pub recovery_timeout_secs: u64,
    /// Command retry attempts (including the first).
    pub retry_max_attempts: u32,
    /// Initial retry delay in milliseconds.
    pub retry_initial_delay_ms: u64,
    /// Retry delay cap in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Retry delay growth factor.
    pub retry_backoff_multiplier: f64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 5_000,
            retry_backoff_multiplier: 2.0,
        }
    }
}

impl ResilienceSettings {
    /// Settings as a circuit breaker config.
    #[must_use]
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
        }
    }

    /// Settings as the command retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }
}

/// Parse an environment override into `target`, keeping the current value
/// (with a warning) when the variable is present but unparseable.
fn override_from_env<T>(target: &mut T, key: &str)
where
    T: FromStr,
{
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, raw = %raw, "ignoring unparseable environment override"),
        }
    }
}
