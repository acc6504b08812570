use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared view of network reachability
///
/// Cloning is cheap; every clone observes and drives the same state.
/// Platform glue calls [`NetworkMonitor::set_reachable`] on connectivity
/// changes and the sync scheduler subscribes to the transitions.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// Create a monitor with an initial reachability
    pub fn new(reachable: bool) -> Self {
        let (tx, _rx) = watch::channel(reachable);
        Self { tx: Arc::new(tx) }
    }

    /// Whether the network is currently reachable
    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report a reachability change; repeated reports of the same value are ignored
    pub fn set_reachable(&self, reachable: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                return false;
            }
            *current = reachable;
            true
        });
        if changed {
            info!(
                "Network {}",
                if reachable { "reachable" } else { "unreachable" }
            );
        }
    }

    /// Receiver that wakes on every reachability change
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
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
    fn test_clones_share_state() {
        let monitor = NetworkMonitor::new(false);
        let other = monitor.clone();
        other.set_reachable(true);
        assert!(monitor.is_reachable());
    }

    #[tokio::test]
    async fn test_subscriber_sees_transitions_only() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_reachable(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_reachable(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }
}
