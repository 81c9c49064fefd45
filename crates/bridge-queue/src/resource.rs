//! Resource-tagged queue specialization.
//!
//! Each submitted operation names the logical engine resources it touches
//! (scene paths, asset GUIDs, settings domains). The registry these tags
//! build is advisory: callers inspect it to decide whether to submit, the
//! queue never blocks admission on a conflict. The engine itself may or may
//! not tolerate concurrent access per resource type, so the bridge provides
//! visibility, not exclusion.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use tracing::warn;
use uuid::Uuid;

use crate::queue::{AddOptions, OperationHandle, OperationQueue, QueueError, QueueStats};

/// [`OperationQueue`] with an advisory resource-lock registry.
#[derive(Debug)]
pub struct ResourceAwareQueue {
    queue: OperationQueue,
}

impl ResourceAwareQueue {
    /// Create a queue admitting at most `max_concurrency` operations at once.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            queue: OperationQueue::new(max_concurrency),
        }
    }

    /// Enqueue an operation holding `resources` for the duration of its
    /// pending + processing lifetime, then await its terminal state.
    ///
    /// Existing holders of any named resource are logged, never blocked.
    pub async fn add_with_resource_lock<F, Fut, T>(
        &self,
        operation: F,
        resources: Vec<String>,
        options: AddOptions,
    ) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with_resource_lock(operation, resources, options)
            .wait()
            .await
    }

    /// As [`Self::add_with_resource_lock`], returning the handle so the
    /// caller can observe the ID or cancel while pending.
    pub fn submit_with_resource_lock<F, Fut, T>(
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
        let holders = self.queue.lock_holders(&resources);
        if !holders.is_empty() {
            warn!(
                resources = ?resources,
                holders = holders.len(),
                "submitting operation against resources with existing holders"
            );
        }
        self.queue
            .submit_with_resources(operation, resources, options)
    }

    /// IDs of operations currently holding any of `resources`.
    ///
    /// Inspection only — submission remains the caller's decision.
    pub fn get_conflicting_operations(&self, resources: &[String]) -> Vec<Uuid> {
        self.queue.lock_holders(resources)
    }

    /// Snapshot of the full registry: resource -> holder IDs.
    pub fn current_locks(&self) -> HashMap<String, HashSet<Uuid>> {
        self.queue.locks_snapshot()
    }

    /// Untagged submission, delegated to the inner queue.
    pub async fn add<F, Fut, T>(&self, operation: F, options: AddOptions) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.queue.add(operation, options).await
    }

    /// See [`OperationQueue::cancel`].
    pub fn cancel(&self, id: Uuid) -> bool {
        self.queue.cancel(id)
    }

    /// See [`OperationQueue::clear`].
    pub fn clear(&self) -> usize {
        self.queue.clear()
    }

    /// See [`OperationQueue::set_max_concurrency`].
    pub fn set_max_concurrency(&self, max_concurrency: usize) {
        self.queue.set_max_concurrency(max_concurrency)
    }

    /// See [`OperationQueue::stats`].
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}
