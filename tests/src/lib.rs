//! # EngineBridge Test Suite
//!
//! Unified test crate for cross-crate behavior:
//!
//! ```text
//! tests/src/
//! ├── mock_engine.rs    # Scriptable in-process engine double
//! └── integration/
//!     ├── dispatch_protocol.rs   # Correlation matching, disconnect, timeouts
//!     ├── queue_scheduling.rs    # Priority, concurrency cap, cancellation
//!     ├── resilience.rs          # Retry timing, circuit breaker transitions
//!     ├── pooling.rs             # Connection reuse and replacement
//!     └── end_to_end.rs          # Full dispatcher pipeline
//! ```
//!
//! Run with `cargo test -p bridge-tests`.

#![allow(dead_code)]

pub mod mock_engine;
