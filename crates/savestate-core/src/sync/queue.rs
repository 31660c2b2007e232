//! Durable mutation queue.
//!
//! Holds at most one pending operation per `(collection, doc_id)`: a newer
//! operation for the same document replaces the older one and moves to the
//! back, so only the latest intent is ever sent. Every change is persisted
//! before the call returns.

use std::collections::HashSet;
use std::sync::Arc;

use super::events::{EventBus, SyncEvent};
use crate::error::Result;
use crate::models::{Operation, OperationId};
use crate::storage::DurableStore;

pub struct MutationQueue {
    operations: Vec<Operation>,
    store: Arc<dyn DurableStore>,
    events: EventBus,
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MutationQueue")
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

impl MutationQueue {
    /// Restore the queue persisted by a previous process.
    pub async fn load(store: Arc<dyn DurableStore>, events: EventBus) -> Result<Self> {
        let operations = store.load_queue().await?;
        if !operations.is_empty() {
            tracing::info!(pending = operations.len(), "Restored pending operations");
        }
        Ok(Self {
            operations,
            store,
            events,
        })
    }

    /// Add `op`, replacing any pending operation for the same document.
    ///
    /// On persistence failure the queue is left exactly as it was.
    pub async fn enqueue(&mut self, op: Operation) -> Result<()> {
        let previous = self.operations.clone();

        if let Some(target) = op.target_key() {
            self.operations
                .retain(|pending| pending.target_key() != Some(target));
        }
        let collapsed = self.operations.len() < previous.len();
        tracing::debug!(
            op_id = %op.id,
            collection = %op.collection,
            doc_id = ?op.doc_id,
            collapsed,
            "Enqueued operation"
        );
        self.operations.push(op);

        if let Err(error) = self.persist().await {
            self.operations = previous;
            return Err(error);
        }

        self.events
            .emit(SyncEvent::QueueSizeChanged(self.operations.len()));
        Ok(())
    }

    /// Pending operations in execution order.
    ///
    /// Nothing is removed; call [`Self::acknowledge`] after each success.
    pub fn drain(&self) -> impl Iterator<Item = Operation> {
        self.operations.clone().into_iter()
    }

    /// First pending operation not in `skip`.
    pub fn next_pending(&self, skip: &HashSet<OperationId>) -> Option<Operation> {
        self.operations
            .iter()
            .find(|op| !skip.contains(&op.id))
            .cloned()
    }

    pub fn pending(&self) -> &[Operation] {
        &self.operations
    }

    pub fn peek_size(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Remove a successfully executed operation.
    ///
    /// Returns `false` when it was already replaced by a newer one.
    pub async fn acknowledge(&mut self, id: OperationId) -> Result<bool> {
        Ok(self.remove(id).await?.is_some())
    }

    /// Bump the retry counter of `id`, returning the new count.
    ///
    /// On persistence failure the counter is left at its previous value.
    pub async fn record_failure(&mut self, id: OperationId) -> Result<Option<u32>> {
        let Some(index) = self.operations.iter().position(|op| op.id == id) else {
            return Ok(None);
        };
        self.operations[index].retries += 1;
        let retries = self.operations[index].retries;

        if let Err(error) = self.persist().await {
            self.operations[index].retries -= 1;
            return Err(error);
        }
        Ok(Some(retries))
    }

    /// Remove `id` regardless of outcome (dead-lettering, manual purge).
    ///
    /// On persistence failure the operation stays queued in place.
    pub async fn remove(&mut self, id: OperationId) -> Result<Option<Operation>> {
        let Some(index) = self.operations.iter().position(|op| op.id == id) else {
            return Ok(None);
        };
        let removed = self.operations.remove(index);

        if let Err(error) = self.persist().await {
            self.operations.insert(index, removed);
            return Err(error);
        }
        self.events
            .emit(SyncEvent::QueueSizeChanged(self.operations.len()));
        Ok(Some(removed))
    }

    async fn persist(&self) -> Result<()> {
        self.store.save_queue(&self.operations).await
    }
}
