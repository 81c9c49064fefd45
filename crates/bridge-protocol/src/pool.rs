//! Endpoint-keyed connection pool.
//!
//! One live [`Connection`] per endpoint at most. Dead entries are evicted
//! lazily on the next lookup and eagerly by a periodic sweep that also
//! retires entries idle past the configured timeout. Pool exhaustion is
//! reported to the caller, never queued — backpressure belongs to the
//! operation queue in front of the pool.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionConfig};
use crate::error::{ProtocolError, Result};

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum simultaneously pooled endpoints.
    pub max_connections: usize,
    /// Idle duration after which an unused entry is retired.
    pub idle_timeout: Duration,
    /// Interval of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

struct PooledEntry {
    connection: Arc<Connection>,
    last_used: Instant,
}

struct PoolInner {
    config: PoolConfig,
    connection_config: ConnectionConfig,
    /// Async mutex: held across connect so the at-most-one-connection-per-
    /// endpoint invariant survives concurrent `get_connection` calls.
    entries: tokio::sync::Mutex<HashMap<String, PooledEntry>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Keyed cache of engine connections.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool and start its background sweep.
    #[must_use]
    pub fn new(config: PoolConfig, connection_config: ConnectionConfig) -> Self {
        let inner = Arc::new(PoolInner {
            config,
            connection_config,
            entries: tokio::sync::Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        });
        let handle = tokio::spawn(sweep_task(Arc::downgrade(&inner)));
        *inner.sweeper.lock() = Some(handle);
        Self { inner }
    }

    /// Get the pooled connection for `endpoint`, connecting a fresh one if
    /// no live entry exists.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::PoolExhausted`] when the pool is at capacity and has
    /// no entry for `endpoint`; [`ProtocolError::Connection`] when a fresh
    /// connection cannot be established.
    pub async fn get_connection(&self, endpoint: &str) -> Result<Arc<Connection>> {
        let mut entries = self.inner.entries.lock().await;

        if let Some(entry) = entries.get_mut(endpoint) {
            if entry.connection.is_open() {
                entry.last_used = Instant::now();
                return Ok(Arc::clone(&entry.connection));
            }
            entries.remove(endpoint);
            debug!(endpoint, "evicted dead pooled connection");
        }

        if entries.len() >= self.inner.config.max_connections {
            return Err(ProtocolError::PoolExhausted {
                max: self.inner.config.max_connections,
            });
        }

        let connection = Arc::new(Connection::new(
            endpoint,
            self.inner.connection_config.clone(),
        ));
        connection.connect().await?;
        entries.insert(
            endpoint.to_string(),
            PooledEntry {
                connection: Arc::clone(&connection),
                last_used: Instant::now(),
            },
        );
        debug!(endpoint, pooled = entries.len(), "pooled new connection");
        Ok(connection)
    }

    /// Number of pooled entries (live or not yet evicted).
    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    /// Whether the pool currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.entries.lock().await.is_empty()
    }

    /// Disconnect every pooled connection, clear the pool, and stop the
    /// sweep. Used during shutdown.
    pub async fn close_all(&self) {
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        let mut entries = self.inner.entries.lock().await;
        let count = entries.len();
        for (endpoint, entry) in entries.drain() {
            entry.connection.disconnect();
            debug!(endpoint = %endpoint, "pooled connection closed");
        }
        if count > 0 {
            info!(closed = count, "connection pool shut down");
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_connections", &self.inner.config.max_connections)
            .finish()
    }
}

/// Periodic sweep: retire dead and idle entries. Holds only a weak handle so
/// dropping the pool stops the sweep.
async fn sweep_task(inner: Weak<PoolInner>) {
    let interval = match inner.upgrade() {
        Some(strong) => strong.config.sweep_interval,
        None => return,
    };
    loop {
        tokio::time::sleep(interval).await;
        let Some(strong) = inner.upgrade() else {
            return;
        };
        let mut entries = strong.entries.lock().await;
        let idle_timeout = strong.config.idle_timeout;
        entries.retain(|endpoint, entry| {
            if !entry.connection.is_open() {
                debug!(endpoint = %endpoint, "sweep evicted dead connection");
                return false;
            }
            if entry.last_used.elapsed() > idle_timeout {
                entry.connection.disconnect();
                debug!(endpoint = %endpoint, "sweep retired idle connection");
                return false;
            }
            true
        });
    }
}
