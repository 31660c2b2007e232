//! Local durable storage boundary.
//!
//! The engine persists the pending queue and the reconciled snapshot through
//! [`DurableStore`]. Implementations are plain key-value persistence; they do
//! not validate what they store.

mod memory;

use async_trait::async_trait;

use crate::models::{DeadLetter, Operation, ProfileSnapshot};
use crate::Result;

pub use memory::MemoryDurableStore;

/// Durable persistence used by the sync engine.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Load the pending queue in enqueue order (empty when never saved)
    async fn load_queue(&self) -> Result<Vec<Operation>>;

    /// Replace the persisted queue
    async fn save_queue(&self, operations: &[Operation]) -> Result<()>;

    /// Load the last persisted profile snapshot
    async fn load_snapshot(&self) -> Result<Option<ProfileSnapshot>>;

    /// Replace the persisted profile snapshot
    async fn save_snapshot(&self, snapshot: &ProfileSnapshot) -> Result<()>;

    /// Keep a record of a dropped operation
    async fn record_dead_letter(&self, dead_letter: &DeadLetter) -> Result<()>;

    /// List dead letters, newest first
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}
