//! Protocol error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors surfaced by the connection and pool layers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket could not be established after exhausting connect retries.
    #[error("failed to connect to {endpoint} after {attempts} attempt(s): {source}")]
    Connection {
        /// Engine endpoint that refused the connection.
        endpoint: String,
        /// Connect attempts performed.
        attempts: u32,
        /// Last underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Socket not writable at send time.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No matching response arrived within the deadline.
    ///
    /// Names the elapsed deadline so logs distinguish a slow engine from an
    /// unreachable one. The socket stays up; a late response is discarded on
    /// read.
    #[error("command '{command}' timed out after {elapsed:?}")]
    CommandTimeout {
        /// Command that went unanswered.
        command: String,
        /// The deadline that elapsed.
        elapsed: Duration,
    },

    /// Pending request invalidated by disconnect or socket loss.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// Pool at capacity with no existing entry for the requested endpoint.
    #[error("connection pool exhausted (maximum {max} endpoints)")]
    PoolExhausted {
        /// Configured pool capacity.
        max: usize,
    },

    /// Engine executed the command and reported failure.
    #[error("engine rejected command: {message}")]
    Engine {
        /// Error message echoed from the engine.
        message: String,
    },

    /// Frame could not be encoded or decoded.
    #[error("frame codec error: {0}")]
    Frame(String),
}

impl ProtocolError {
    /// Whether retrying could plausibly succeed.
    ///
    /// Transport-level failures (connect, write, timeout, teardown) are
    /// transient; an engine-reported rejection is deterministic and must
    /// never be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Transport(_)
                | Self::CommandTimeout { .. }
                | Self::ConnectionClosed
        )
    }
}
