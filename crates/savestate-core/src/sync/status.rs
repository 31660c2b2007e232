//! Sync status state machine.
//!
//! `idle -> syncing -> {synced | retrying | error}`, with `retrying -> syncing`
//! on the next pass. `offline` is orthogonal: entering it remembers the status
//! underneath and leaving it restores that status. Every change is broadcast.

use std::sync::{Mutex, MutexGuard};

use super::events::{EventBus, SyncEvent};
use crate::state::SyncStatus;

#[derive(Debug)]
struct StatusState {
    current: SyncStatus,
    /// Status to restore when connectivity returns
    underlying: SyncStatus,
}

#[derive(Debug)]
pub struct SyncStatusMachine {
    state: Mutex<StatusState>,
    events: EventBus,
}

impl SyncStatusMachine {
    pub fn new(events: EventBus) -> Self {
        Self {
            state: Mutex::new(StatusState {
                current: SyncStatus::Idle,
                underlying: SyncStatus::Idle,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn current(&self) -> SyncStatus {
        self.lock().current
    }

    /// Move to `next` unless offline, in which case it is applied on reconnect.
    fn transition(&self, next: SyncStatus) {
        let changed = {
            let mut state = self.lock();
            state.underlying = next;
            if state.current == SyncStatus::Offline || state.current == next {
                None
            } else {
                let previous = std::mem::replace(&mut state.current, next);
                Some(previous)
            }
        };

        if let Some(previous) = changed {
            tracing::debug!(from = %previous, to = %next, "Sync status changed");
            self.events.emit(SyncEvent::SyncStatusChanged(next));
        }
    }

    pub fn begin_pass(&self) {
        self.transition(SyncStatus::Syncing);
    }

    pub fn pass_succeeded(&self) {
        self.transition(SyncStatus::Synced);
    }

    /// Failures remain queued and a retry pass is scheduled.
    pub fn pass_retrying(&self) {
        self.transition(SyncStatus::Retrying);
    }

    /// The operation blocking progress was dead-lettered.
    pub fn pass_failed(&self) {
        self.transition(SyncStatus::Error);
    }

    /// Apply a connectivity transition. Repeated values are ignored.
    pub fn network_changed(&self, online: bool) {
        let changed = {
            let mut state = self.lock();
            let is_offline = state.current == SyncStatus::Offline;
            if online && is_offline {
                state.current = state.underlying;
                Some(state.current)
            } else if !online && !is_offline {
                state.underlying = state.current;
                state.current = SyncStatus::Offline;
                Some(SyncStatus::Offline)
            } else {
                None
            }
        };

        if let Some(next) = changed {
            tracing::debug!(to = %next, online, "Sync status changed by connectivity");
            self.events.emit(SyncEvent::SyncStatusChanged(next));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::Receiver;

    fn machine() -> (SyncStatusMachine, Receiver<SyncEvent>) {
        let events = EventBus::new(16);
        let rx = events.subscribe();
        (SyncStatusMachine::new(events), rx)
    }

    fn drain(rx: &mut Receiver<SyncEvent>) -> Vec<SyncStatus> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::SyncStatusChanged(status) = event {
                seen.push(status);
            }
        }
        seen
    }

    #[test]
    fn pass_lifecycle_is_broadcast() {
        let (status, mut rx) = machine();
        assert_eq!(status.current(), SyncStatus::Idle);

        status.begin_pass();
        status.pass_retrying();
        status.begin_pass();
        status.pass_failed();

        assert_eq!(
            drain(&mut rx),
            vec![
                SyncStatus::Syncing,
                SyncStatus::Retrying,
                SyncStatus::Syncing,
                SyncStatus::Error
            ]
        );
    }

    #[test]
    fn repeated_status_is_not_rebroadcast() {
        let (status, mut rx) = machine();
        status.pass_succeeded();
        status.pass_succeeded();
        assert_eq!(drain(&mut rx), vec![SyncStatus::Synced]);
    }

    #[test]
    fn offline_restores_underlying_status() {
        let (status, mut rx) = machine();
        status.pass_retrying();
        status.network_changed(false);
        status.network_changed(false);
        assert_eq!(status.current(), SyncStatus::Offline);

        status.network_changed(true);
        assert_eq!(status.current(), SyncStatus::Retrying);
        assert_eq!(
            drain(&mut rx),
            vec![SyncStatus::Retrying, SyncStatus::Offline, SyncStatus::Retrying]
        );
    }

    #[test]
    fn transitions_while_offline_apply_on_reconnect() {
        let (status, mut rx) = machine();
        status.network_changed(false);
        status.pass_succeeded();
        assert_eq!(status.current(), SyncStatus::Offline);

        status.network_changed(true);
        assert_eq!(status.current(), SyncStatus::Synced);
        assert_eq!(drain(&mut rx), vec![SyncStatus::Offline, SyncStatus::Synced]);
    }
}
