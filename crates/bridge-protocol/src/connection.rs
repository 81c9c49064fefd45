//! One multiplexed connection to one engine endpoint.
//!
//! Every concurrent logical request shares the single socket. Outbound
//! commands are stamped with a correlation ID from a per-connection monotonic
//! counter, so uniqueness needs no coordination and an ID can never be reused
//! within the connection's lifetime. A single reader task demultiplexes
//! inbound frames back to the oneshot belonging to the matching request;
//! responses may arrive in any order relative to requests.
//!
//! Request timeouts remove only the pending entry — the socket stays up and
//! a late response is discarded on read. Socket loss and explicit
//! [`Connection::disconnect`] reject every outstanding request with
//! [`ProtocolError::ConnectionClosed`] and revert the connection to closed;
//! the next [`Connection::send_command`] reconnects implicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use bridge_resilience::{with_retry, RetryPolicy};

use crate::error::{ProtocolError, Result};
use crate::frame::{self, CommandFrame};

/// Outbound frames buffered toward the writer task.
const WRITER_QUEUE_CAPACITY: usize = 64;

/// Lifecycle events buffered per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Connection tuning knobs.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for a single connect attempt.
    pub connect_timeout: Duration,
    /// Connect attempts performed before giving up (including the first).
    pub max_connect_attempts: u32,
    /// Fixed delay between connect attempts.
    pub connect_retry_delay: Duration,
    /// Default deadline for a command round trip.
    pub command_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(1),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Lifecycle notifications for observers (health reporting, logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Socket established and serving requests.
    Connected,
    /// Socket gone; outstanding requests were rejected.
    Disconnected,
}

/// Snapshot of transfer counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    /// Commands written to the socket.
    pub requests_sent: u64,
    /// Inbound frames matched to a pending request.
    pub responses_matched: u64,
    /// Inbound frames dropped (malformed or unmatched).
    pub frames_dropped: u64,
    /// Sockets established over the connection's lifetime.
    pub connects_established: u64,
    /// Requests currently awaiting a response.
    pub pending_requests: usize,
}

#[derive(Default)]
struct Counters {
    requests_sent: AtomicU64,
    responses_matched: AtomicU64,
    frames_dropped: AtomicU64,
    connects_established: AtomicU64,
}

/// Socket-scoped state. `generation` ties reader/writer tasks to the socket
/// they serve so a stale task can never tear down its successor.
#[derive(Default)]
struct Lifecycle {
    generation: u64,
    writer: Option<mpsc::Sender<Vec<u8>>>,
    io_tasks: Option<(JoinHandle<()>, JoinHandle<()>)>,
}

struct Shared {
    endpoint: String,
    config: ConnectionConfig,
    next_correlation: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes `connect()` so concurrent callers produce one socket.
    connect_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ConnectionEvent>,
    counters: Counters,
}

/// A multiplexed command channel to one engine endpoint.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create an idle (not yet connected) connection.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                endpoint: endpoint.into(),
                config,
                next_correlation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(Lifecycle::default()),
                connect_lock: tokio::sync::Mutex::new(()),
                events,
                counters: Counters::default(),
            }),
        }
    }

    /// Endpoint this connection targets.
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Whether the socket is currently established.
    pub fn is_open(&self) -> bool {
        self.shared.lifecycle.lock().writer.is_some()
    }

    /// Transfer counters snapshot.
    pub fn stats(&self) -> ConnectionStats {
        let c = &self.shared.counters;
        ConnectionStats {
            requests_sent: c.requests_sent.load(Ordering::Relaxed),
            responses_matched: c.responses_matched.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            connects_established: c.connects_established.load(Ordering::Relaxed),
            pending_requests: self.shared.pending.lock().len(),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Lifecycle events as a `Stream`.
    pub fn event_stream(&self) -> BroadcastStream<ConnectionEvent> {
        BroadcastStream::new(self.subscribe_events())
    }

    /// Establish the socket. Idempotent if already connected.
    ///
    /// Attempts are retried with a fixed inter-attempt delay up to the
    /// configured maximum.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Connection`] carrying the last underlying I/O error
    /// and the attempt count once retries are exhausted.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.shared.connect_lock.lock().await;
        if self.is_open() {
            return Ok(());
        }

        let config = &self.shared.config;
        let policy =
            RetryPolicy::fixed(config.max_connect_attempts.max(1), config.connect_retry_delay);
        let endpoint = self.shared.endpoint.clone();
        let connect_timeout = config.connect_timeout;

        let stream = with_retry(&policy, || {
            let endpoint = endpoint.clone();
            async move {
                match tokio::time::timeout(connect_timeout, TcpStream::connect(&endpoint)).await {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect attempt timed out",
                    )),
                }
            }
        })
        .await
        .map_err(|err| ProtocolError::Connection {
            endpoint: self.shared.endpoint.clone(),
            attempts: err.attempts,
            source: err.into_inner(),
        })?;

        // Command frames are small; don't let Nagle batch them.
        let _ = stream.set_nodelay(true);
        self.shared.install(stream);
        Ok(())
    }

    /// Send a command with the configured default timeout.
    pub async fn send_command(&self, command: &str, params: Value) -> Result<Value> {
        self.send_command_with_timeout(command, params, self.shared.config.command_timeout)
            .await
    }

    /// Send a command and await its correlated response.
    ///
    /// Connects implicitly if the connection is closed.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Engine`] when the engine reports an error status.
    /// - [`ProtocolError::CommandTimeout`] when no matching response arrives
    ///   within `timeout`; the pending entry is removed, the socket stays up.
    /// - [`ProtocolError::Transport`] when the socket is not writable.
    /// - [`ProtocolError::ConnectionClosed`] when the socket is torn down
    ///   while the request is outstanding.
    pub async fn send_command_with_timeout(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_open() {
            self.connect().await?;
        }

        let correlation_id = self.shared.next_correlation.fetch_add(1, Ordering::Relaxed) + 1;
        let encoded = frame::encode(&CommandFrame {
            command: command.to_owned(),
            params,
            correlation_id,
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(correlation_id, tx);

        let writer = self.shared.lifecycle.lock().writer.clone();
        let Some(writer) = writer else {
            self.shared.pending.lock().remove(&correlation_id);
            return Err(ProtocolError::Transport(
                "connection is not writable".to_string(),
            ));
        };
        if writer.send(encoded).await.is_err() {
            self.shared.pending.lock().remove(&correlation_id);
            return Err(ProtocolError::Transport(
                "writer task terminated".to_string(),
            ));
        }
        self.shared
            .counters
            .requests_sent
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            endpoint = %self.shared.endpoint,
            command,
            correlation_id,
            "command dispatched"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without an explicit resolution.
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&correlation_id);
                debug!(
                    endpoint = %self.shared.endpoint,
                    command,
                    correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "no response within deadline"
                );
                Err(ProtocolError::CommandTimeout {
                    command: command.to_owned(),
                    elapsed: timeout,
                })
            }
        }
    }

    /// Close the socket and reject every outstanding request with
    /// [`ProtocolError::ConnectionClosed`].
    pub fn disconnect(&self) {
        let generation = self.shared.lifecycle.lock().generation;
        self.shared.teardown(generation, "disconnect requested");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.shared.endpoint)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Shared {
    /// Wire a fresh socket: bump the generation, install the writer channel,
    /// spawn the reader/writer tasks for this generation.
    fn install(self: &Arc<Self>, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_QUEUE_CAPACITY);

        let generation = {
            let mut lc = self.lifecycle.lock();
            lc.generation += 1;
            lc.writer = Some(writer_tx);
            let reader = tokio::spawn(reader_task(Arc::clone(self), lc.generation, read_half));
            let writer = tokio::spawn(writer_task(
                Arc::clone(self),
                lc.generation,
                write_half,
                writer_rx,
            ));
            lc.io_tasks = Some((reader, writer));
            lc.generation
        };

        self.counters
            .connects_established
            .fetch_add(1, Ordering::Relaxed);
        let _ = self.events.send(ConnectionEvent::Connected);
        info!(endpoint = %self.endpoint, generation, "engine connection established");
    }

    /// Tear down the socket belonging to `generation`. A stale generation
    /// (already superseded by reconnect or disconnect) is a no-op.
    fn teardown(&self, generation: u64, reason: &str) {
        let (writer, tasks) = {
            let mut lc = self.lifecycle.lock();
            if lc.generation != generation {
                return;
            }
            if lc.writer.is_none() && lc.io_tasks.is_none() {
                return; // never connected, or already torn down
            }
            lc.generation += 1;
            (lc.writer.take(), lc.io_tasks.take())
        };
        drop(writer);
        if let Some((reader, writer_task)) = tasks {
            reader.abort();
            writer_task.abort();
        }

        let rejected = self.reject_all_pending();
        if rejected > 0 {
            warn!(
                endpoint = %self.endpoint,
                rejected,
                reason,
                "rejected outstanding requests on teardown"
            );
        } else {
            debug!(endpoint = %self.endpoint, reason, "connection torn down");
        }
        let _ = self.events.send(ConnectionEvent::Disconnected);
    }

    fn reject_all_pending(&self) -> usize {
        let waiters: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        let count = waiters.len();
        for tx in waiters {
            let _ = tx.send(Err(ProtocolError::ConnectionClosed));
        }
        count
    }

    /// Route one inbound payload. Malformed or unmatched frames are logged
    /// and dropped — one bad frame must not poison unrelated requests, and
    /// this path must never crash the reader loop.
    fn dispatch_inbound(&self, payload: &[u8]) {
        let response = match frame::decode_response(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "dropping malformed inbound frame");
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let waiter = self.pending.lock().remove(&response.correlation_id);
        match waiter {
            Some(tx) => {
                self.counters
                    .responses_matched
                    .fetch_add(1, Ordering::Relaxed);
                let _ = tx.send(response.into_result());
            }
            None => {
                // Usually a late response to a request that already timed out.
                debug!(
                    endpoint = %self.endpoint,
                    correlation_id = response.correlation_id,
                    "dropping unmatched response frame"
                );
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Single reader per socket: demultiplexes inbound frames by correlation ID.
async fn reader_task(shared: Arc<Shared>, generation: u64, mut read_half: OwnedReadHalf) {
    loop {
        match frame::read_frame(&mut read_half).await {
            Ok(payload) => shared.dispatch_inbound(&payload),
            Err(e) => {
                debug!(endpoint = %shared.endpoint, error = %e, "socket read ended");
                break;
            }
        }
    }
    shared.teardown(generation, "socket read ended");
}

/// Drains the outbound queue onto the socket, preserving call order.
async fn writer_task(
    shared: Arc<Shared>,
    generation: u64,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = frame::write_frame(&mut write_half, &bytes).await {
            warn!(endpoint = %shared.endpoint, error = %e, "socket write failed");
            break;
        }
    }
    shared.teardown(generation, "socket write ended");
}
