//! Priority operation queue with bounded concurrency.
//!
//! ## Invariants
//!
//! - An item occupies exactly one of {pending list, processing set} at a
//!   time and leaves all bookkeeping on its terminal state.
//! - `processing.len() <= max_concurrency` at all times.
//! - Equal-priority items are admitted in arrival order: insertion uses a
//!   stable partition-point search, never a re-sort.
//!
//! Admission is settle-driven: every settlement immediately re-pumps the
//! queue, so throughput stays at the concurrency ceiling without a polling
//! interval. A pending-item timeout removes and rejects the item only if it
//! has not been admitted when the timer fires; an admitted operation is never
//! interrupted — the engine has no cancellation protocol, so in-flight work
//! always runs to its own completion or timeout.
//!
//! Known limitation: no starvation bound. Under sustained higher-priority
//! load a low-priority item can wait indefinitely; submitters that care
//! should set a pending timeout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

/// Samples kept for the rolling mean processing time.
const LATENCY_WINDOW: usize = 100;

/// Type-erased operation body. Resolves the caller's oneshot itself and
/// reports success/failure back to the queue for statistics.
type OperationFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Settles the caller's oneshot without running the operation.
type RejectFn = Box<dyn FnOnce(QueueError) + Send>;

/// Errors settled into a queued operation's result.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The item was cancelled while still pending; its operation never ran.
    #[error("operation cancelled before it ran")]
    Cancelled,

    /// The queue was cleared while the item was still pending.
    #[error("queue cleared before the operation ran")]
    Cleared,

    /// The item was still pending when its timeout fired. Admitted
    /// operations are never interrupted by this timeout.
    #[error("operation timed out after {elapsed:?} while awaiting admission")]
    TimedOut {
        /// The deadline that elapsed.
        elapsed: Duration,
    },

    /// The operation ran and failed.
    #[error("operation failed: {0}")]
    Operation(anyhow::Error),

    /// Internal: the result channel was dropped without settling.
    #[error("operation result channel dropped")]
    ChannelClosed,
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        Self::Operation(err)
    }
}

/// Submission options.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Higher priorities are admitted first; ties break FIFO.
    pub priority: i32,
    /// Deadline for the item to leave the pending state.
    pub timeout: Option<Duration>,
}

/// Counters snapshot.
///
/// `completed`/`failed` count executed operations; items rejected before
/// running (cancelled, cleared, timed out while pending) appear in neither.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    /// Items awaiting admission.
    pub pending: usize,
    /// Items currently executing.
    pub processing: usize,
    /// Operations that ran to success.
    pub completed: u64,
    /// Operations that ran and failed.
    pub failed: u64,
    /// Rolling mean execution time over the last 100 settlements.
    pub average_processing_time_ms: f64,
    /// Total items in the system (pending + processing).
    pub queue_length: usize,
    /// Current concurrency ceiling.
    pub max_concurrency: usize,
}

/// Handle to a submitted operation: its ID plus the settled result.
#[derive(Debug)]
pub struct OperationHandle<T> {
    id: Uuid,
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> OperationHandle<T> {
    /// ID usable with [`OperationQueue::cancel`] and the lock registry.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Await the operation's terminal state.
    pub async fn wait(self) -> Result<T, QueueError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(QueueError::ChannelClosed),
        }
    }
}

struct PendingItem {
    id: Uuid,
    priority: i32,
    enqueued_at: Instant,
    resources: Vec<String>,
    operation: OperationFuture,
    reject: RejectFn,
}

#[derive(Default)]
struct QueueState {
    /// Sorted by priority descending; FIFO among equals by construction.
    pending: Vec<PendingItem>,
    /// Admitted items, with their resources for release on settlement.
    processing: HashMap<Uuid, Vec<String>>,
    /// Advisory lock registry: resource -> holders (pending or processing).
    locks: HashMap<String, HashSet<Uuid>>,
    max_concurrency: usize,
    completed: u64,
    failed: u64,
    latencies: VecDeque<Duration>,
}

impl QueueState {
    fn release_locks(&mut self, id: Uuid, resources: &[String]) {
        for resource in resources {
            if let Some(holders) = self.locks.get_mut(resource) {
                holders.remove(&id);
                if holders.is_empty() {
                    self.locks.remove(resource);
                }
            }
        }
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
}

impl QueueInner {
    /// Admit items until the ceiling is reached or nothing is pending.
    fn pump(self: &Arc<Self>) {
        loop {
            let admitted = {
                let mut state = self.state.lock();
                if state.pending.is_empty() || state.processing.len() >= state.max_concurrency {
                    None
                } else {
                    let item = state.pending.remove(0);
                    state.processing.insert(item.id, item.resources.clone());
                    Some(item)
                }
            };
            let Some(item) = admitted else { return };

            let PendingItem {
                id,
                priority,
                enqueued_at,
                operation,
                reject,
                ..
            } = item;
            // The operation settles the caller's channel itself.
            drop(reject);

            debug!(
                %id,
                priority,
                waited_ms = enqueued_at.elapsed().as_millis() as u64,
                "operation admitted"
            );

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let started = Instant::now();
                let ok = operation.await;
                inner.settle(id, ok, started);
            });
        }
    }

    fn settle(self: &Arc<Self>, id: Uuid, ok: bool, started: Instant) {
        {
            let mut state = self.state.lock();
            if let Some(resources) = state.processing.remove(&id) {
                state.release_locks(id, &resources);
            }
            if ok {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
            state.latencies.push_back(started.elapsed());
            if state.latencies.len() > LATENCY_WINDOW {
                state.latencies.pop_front();
            }
        }
        self.pump();
    }

    /// Reject-and-remove a still-pending item when its timer fires.
    fn expire(self: &Arc<Self>, id: Uuid, elapsed: Duration) {
        let item = {
            let mut state = self.state.lock();
            match state.pending.iter().position(|item| item.id == id) {
                Some(index) => {
                    let item = state.pending.remove(index);
                    state.release_locks(id, &item.resources);
                    Some(item)
                }
                None => None, // already admitted or otherwise settled
            }
        };
        if let Some(item) = item {
            debug!(%id, "pending operation expired");
            (item.reject)(QueueError::TimedOut { elapsed });
        }
    }
}

/// Priority queue of deferred async operations bounded by a concurrency cap.
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    /// Create a queue admitting at most `max_concurrency` operations at once.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    max_concurrency,
                    ..QueueState::default()
                }),
            }),
        }
    }

    /// Enqueue an operation and await its terminal state.
    ///
    /// # Errors
    ///
    /// See [`QueueError`]; an operation's own failure arrives as
    /// [`QueueError::Operation`] wrapping the underlying error.
    pub async fn add<F, Fut, T>(&self, operation: F, options: AddOptions) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(operation, options).wait().await
    }

    /// Enqueue an operation, returning a handle exposing its ID before the
    /// result settles. Needed by callers that may cancel.
    pub fn submit<F, Fut, T>(&self, operation: F, options: AddOptions) -> OperationHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with_resources(operation, Vec::new(), options)
    }

    /// Enqueue with a resource tag set. Public surface for the tagged path
    /// is [`crate::ResourceAwareQueue`].
    pub(crate) fn submit_with_resources<F, Fut, T>(
        &self,
        operation: F,
        resources: Vec<String>,
        options: AddOptions,
    ) -> OperationHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel::<Result<T, QueueError>>();

        // The sender lives in a shared slot so either the operation body
        // (run path) or the reject closure (cancel/clear/timeout path) can
        // settle the caller — whichever takes it first.
        let slot = Arc::new(Mutex::new(Some(tx)));
        let run_slot = Arc::clone(&slot);
        let operation: OperationFuture = Box::pin(async move {
            let result = operation().await;
            let ok = result.is_ok();
            if let Some(tx) = run_slot.lock().take() {
                let _ = tx.send(result.map_err(QueueError::Operation));
            }
            ok
        });
        let reject: RejectFn = Box::new(move |err| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(Err(err));
            }
        });

        let priority = options.priority;
        {
            let mut state = self.inner.state.lock();
            let item = PendingItem {
                id,
                priority,
                enqueued_at: Instant::now(),
                resources: resources.clone(),
                operation,
                reject,
            };
            // Stable insertion point: after every item of >= priority.
            let index = state
                .pending
                .partition_point(|existing| existing.priority >= priority);
            state.pending.insert(index, item);
            for resource in &resources {
                state.locks.entry(resource.clone()).or_default().insert(id);
            }
        }
        debug!(%id, priority, "operation enqueued");

        if let Some(timeout) = options.timeout {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                inner.expire(id, timeout);
            });
        }

        self.inner.pump();
        OperationHandle { id, rx }
    }

    /// Cancel a still-pending item; its operation never runs.
    ///
    /// Returns `false` for an item already processing (or unknown): in-flight
    /// work cannot be aborted, its promise settles naturally.
    pub fn cancel(&self, id: Uuid) -> bool {
        let item = {
            let mut state = self.inner.state.lock();
            match state.pending.iter().position(|item| item.id == id) {
                Some(index) => {
                    let item = state.pending.remove(index);
                    state.release_locks(id, &item.resources);
                    Some(item)
                }
                None => None,
            }
        };
        match item {
            Some(item) => {
                debug!(%id, "pending operation cancelled");
                (item.reject)(QueueError::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Reject every pending item with [`QueueError::Cleared`]. Processing
    /// items are unaffected. Returns the number of items rejected.
    pub fn clear(&self) -> usize {
        let items: Vec<PendingItem> = {
            let mut state = self.inner.state.lock();
            let items = std::mem::take(&mut state.pending);
            for item in &items {
                state.release_locks(item.id, &item.resources);
            }
            items
        };
        let count = items.len();
        for item in items {
            (item.reject)(QueueError::Cleared);
        }
        if count > 0 {
            info!(cleared = count, "pending operations cleared");
        }
        count
    }

    /// Adjust the concurrency ceiling and re-trigger admission if raised.
    /// A ceiling of 0 suspends admission until raised again.
    pub fn set_max_concurrency(&self, max_concurrency: usize) {
        {
            let mut state = self.inner.state.lock();
            state.max_concurrency = max_concurrency;
        }
        debug!(max_concurrency, "concurrency ceiling adjusted");
        self.inner.pump();
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let average_processing_time_ms = if state.latencies.is_empty() {
            0.0
        } else {
            let total: Duration = state.latencies.iter().sum();
            total.as_secs_f64() * 1000.0 / state.latencies.len() as f64
        };
        QueueStats {
            pending: state.pending.len(),
            processing: state.processing.len(),
            completed: state.completed,
            failed: state.failed,
            average_processing_time_ms,
            queue_length: state.pending.len() + state.processing.len(),
            max_concurrency: state.max_concurrency,
        }
    }

    /// IDs currently holding any of `resources` (pending or processing).
    pub(crate) fn lock_holders(&self, resources: &[String]) -> Vec<Uuid> {
        let state = self.inner.state.lock();
        let mut ids: Vec<Uuid> = resources
            .iter()
            .filter_map(|resource| state.locks.get(resource))
            .flatten()
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Snapshot of the full advisory lock registry.
    pub(crate) fn locks_snapshot(&self) -> HashMap<String, HashSet<Uuid>> {
        self.inner.state.lock().locks.clone()
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("OperationQueue")
            .field("pending", &stats.pending)
            .field("processing", &stats.processing)
            .field("max_concurrency", &stats.max_concurrency)
            .finish()
    }
}
