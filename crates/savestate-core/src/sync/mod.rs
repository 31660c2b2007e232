//! Synchronization and conflict-resolution engine.
//!
//! Local edits land in a durable [`MutationQueue`] and are pushed by the
//! [`QueueProcessor`] whenever the [`NetworkMonitor`] reports connectivity.
//! Remote edits arrive through the [`RemoteWatchChannel`], are filtered by the
//! [`EchoSuppressor`] and reconciled by the [`MergeResolver`].

mod echo;
mod events;
mod executor;
mod merge;
mod network;
mod processor;
mod queue;
mod status;
mod watch;

use std::sync::Arc;

pub use echo::{EchoSuppressor, EchoVerdict};
pub use events::{EventBus, SyncEvent};
pub use executor::{Execution, OperationExecutor};
pub use merge::{reconcile, remote_is_newer, remote_needs_update, MergeOutcome, MergeResolver};
pub use network::NetworkMonitor;
pub use processor::{PassReport, ProcessorParts, QueueProcessor};
pub use queue::MutationQueue;
pub use status::SyncStatusMachine;
pub use watch::{RemoteChange, RemoteWatchChannel, WatchSubscription};

/// Source of "now" in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock used outside tests.
pub fn system_clock() -> Clock {
    Arc::new(crate::util::unix_timestamp_millis)
}
