//! # Bridge Protocol
//!
//! Command dispatch over one persistent socket per engine endpoint.
//!
//! The remote engine accepts exactly one socket, so every concurrent logical
//! request in the bridge shares that physical connection. Each outbound
//! command carries a correlation ID; a single reader task demultiplexes
//! inbound frames back to the caller that issued the matching request. The
//! socket behaves as a full-duplex multiplexed channel with no head-of-line
//! blocking at the application layer.
//!
//! ## Layers
//!
//! - [`frame`]: length-prefixed JSON wire codec and the tagged response
//!   decode ([`ResponseFrame::into_result`]).
//! - [`connection`]: one [`Connection`] per endpoint — correlation table,
//!   reader/writer tasks, connect retry, per-request timeouts, lifecycle
//!   events.
//! - [`pool`]: [`ConnectionPool`] keyed by endpoint — reuse, dead-entry
//!   eviction, idle sweep, capacity cap.
//!
//! Retry of failed commands is deliberately NOT done here: transport
//! failures surface to the immediate caller, which layers
//! `bridge-resilience` policies on top.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod connection;
pub mod error;
pub mod frame;
pub mod pool;

pub use connection::{Connection, ConnectionConfig, ConnectionEvent, ConnectionStats};
pub use error::{ProtocolError, Result};
pub use frame::{CommandFrame, ResponseFrame, ResponseStatus, MAX_FRAME_SIZE};
pub use pool::{ConnectionPool, PoolConfig};
