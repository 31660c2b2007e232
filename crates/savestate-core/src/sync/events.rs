//! Engine events broadcast to external listeners (UI, telemetry).

use tokio::sync::broadcast;

use crate::models::{Operation, ProfileSnapshot};
use crate::state::SyncStatus;

/// Observable engine event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Pending queue length after an enqueue or removal
    QueueSizeChanged(usize),
    /// An operation was dead-lettered
    OperationDropped { operation: Operation, error: String },
    SyncStatusChanged(SyncStatus),
    /// A remote change was reconciled into the local profile
    ProfileMerged(ProfileSnapshot),
}

/// Fan-out channel for [`SyncEvent`]s. Slow listeners lose the oldest events.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: SyncEvent) {
        tracing::trace!(?event, "sync event");
        // No listeners is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_listeners_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(SyncEvent::QueueSizeChanged(1));
    }

    #[test]
    fn listeners_receive_events_in_order() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(SyncEvent::QueueSizeChanged(1));
        bus.emit(SyncEvent::SyncStatusChanged(SyncStatus::Syncing));

        assert_eq!(rx.try_recv().unwrap(), SyncEvent::QueueSizeChanged(1));
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::SyncStatusChanged(SyncStatus::Syncing)
        );
    }
}
