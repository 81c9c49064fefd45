//! # Bridge Runtime
//!
//! Composition root for the EngineBridge server.
//!
//! Nothing in the lower crates is a process-wide singleton; this crate
//! constructs every component explicitly and owns its lifetime:
//!
//! - [`config::BridgeConfig`] — defaults, `EB_*` environment overrides, and
//!   a production validation pass.
//! - [`container::BridgeContainer`] — builds the connection pool, the
//!   resource-aware queue, the circuit breaker, and the retry policy, and
//!   drives the graceful shutdown sequence.
//! - [`dispatcher::EngineDispatcher`] — the end-to-end dispatch path
//!   consumed by the tool-facing collaborators: queue admission → circuit
//!   breaker → transient-only retry → pooled `send_command`.

pub mod config;
pub mod container;
pub mod dispatcher;

pub use config::BridgeConfig;
pub use container::BridgeContainer;
pub use dispatcher::{DispatchOptions, EngineDispatcher};
