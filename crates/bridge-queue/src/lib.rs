//! # Bridge Queue
//!
//! Deferred-operation scheduling in front of the engine connection.
//!
//! The remote engine is a single resource-constrained process, so the bridge
//! bounds how much concurrent work it may be asked to do. [`OperationQueue`]
//! admits queued async operations in priority order (FIFO among equals) up to
//! a runtime-adjustable concurrency ceiling, settles each caller's result
//! individually, and keeps rolling throughput statistics.
//!
//! [`ResourceAwareQueue`] additionally tags each operation with the logical
//! resources it touches. The resulting lock registry is **advisory**: it
//! gives callers visibility into conflicts before submission, it never blocks
//! admission — whether concurrent access per resource is tolerable is the
//! engine's call, not the queue's.
//!
//! Queue state is in-memory only; nothing survives a restart.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod queue;
pub mod resource;

pub use queue::{AddOptions, OperationHandle, OperationQueue, QueueError, QueueStats};
pub use resource::ResourceAwareQueue;
