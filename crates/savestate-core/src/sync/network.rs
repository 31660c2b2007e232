//! Connectivity monitor.
//!
//! Platform glue calls [`NetworkMonitor::set_online`] on reachability changes;
//! the engine reads the current value or waits for transitions.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared online/offline flag with transition notifications.
#[derive(Clone, Debug)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    /// Record connectivity. Returns `true` when this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Network connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that wakes on every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_online_reports_only_transitions() {
        let monitor = NetworkMonitor::new(true);
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        assert!(!monitor.is_online());
        assert!(!monitor.set_online(false));
    }

    #[tokio::test]
    async fn subscribers_wake_on_transition() {
        let monitor = NetworkMonitor::new(false);
        let mut first = monitor.subscribe();
        let mut second = monitor.subscribe();

        monitor.set_online(true);

        first.changed().await.unwrap();
        second.changed().await.unwrap();
        assert!(*first.borrow());
        assert!(*second.borrow());
    }
}
