//! Applies queued operations to the remote store.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::echo::EchoSuppressor;
use super::Clock;
use crate::error::RemoteError;
use crate::models::{Operation, OperationId, OperationKind};
use crate::remote::RemoteStore;

const COMPLETED_CAPACITY: usize = 256;

/// Operation ids that already reached the remote store, oldest evicted first.
#[derive(Debug, Default)]
struct CompletedIds {
    order: VecDeque<OperationId>,
    ids: HashSet<OperationId>,
}

impl CompletedIds {
    fn contains(&self, id: OperationId) -> bool {
        self.ids.contains(&id)
    }

    fn insert(&mut self, id: OperationId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > COMPLETED_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

/// What happened when an operation was handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Applied,
    /// Already applied earlier under the same operation id
    AlreadyApplied,
}

pub struct OperationExecutor {
    remote: Arc<dyn RemoteStore>,
    echo: Arc<EchoSuppressor>,
    clock: Clock,
    completed: Mutex<CompletedIds>,
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OperationExecutor")
            .field("echo", &self.echo)
            .finish_non_exhaustive()
    }
}

impl OperationExecutor {
    pub fn new(remote: Arc<dyn RemoteStore>, echo: Arc<EchoSuppressor>, clock: Clock) -> Self {
        Self {
            remote,
            echo,
            clock,
            completed: Mutex::new(CompletedIds::default()),
        }
    }

    fn completed(&self) -> MutexGuard<'_, CompletedIds> {
        self.completed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Apply `op` to the remote store.
    ///
    /// Executing the same operation id twice performs one remote write.
    pub async fn execute(&self, op: &Operation) -> Result<Execution, RemoteError> {
        if self.completed().contains(op.id) {
            tracing::debug!(op_id = %op.id, "Skipping already applied operation");
            return Ok(Execution::AlreadyApplied);
        }

        let doc_id = op.resolved_doc_id();
        self.echo.mark_local_write((self.clock)());

        match op.kind {
            OperationKind::Create | OperationKind::Update => {
                self.remote
                    .set(&op.collection, &doc_id, op.payload.clone(), op.merge.is_merge())
                    .await?;
            }
            OperationKind::Delete => {
                self.remote.delete(&op.collection, &doc_id).await?;
            }
        }

        self.completed().insert(op.id);
        tracing::debug!(
            op_id = %op.id,
            collection = %op.collection,
            doc_id = %doc_id,
            kind = ?op.kind,
            "Applied operation"
        );
        Ok(Execution::Applied)
    }
}
