//! Online/offline tracking.
//!
//! [`ConnectivityMonitor`] holds the current level and hands out
//! [`ConnectivityEvents`] streams that yield only real transitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    /// The remote became reachable.
    Online,
    /// The remote became unreachable.
    Offline,
}

impl ConnectivityEvent {
    fn from_level(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }
}

/// Shared online/offline flag.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial level.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Current level.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Set the level, returning `true` if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        changed
    }

    /// Subscribe to transitions after this point.
    pub fn subscribe(&self) -> ConnectivityEvents {
        let rx = self.tx.subscribe();
        let last = *rx.borrow();
        ConnectivityEvents { rx, last }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Stream of connectivity transitions.
///
/// Rapid flapping may be coalesced, but two consecutive events never
/// report the same level.
#[derive(Debug)]
pub struct ConnectivityEvents {
    rx: watch::Receiver<bool>,
    last: bool,
}

impl ConnectivityEvents {
    /// Wait for the next transition.
    ///
    /// Returns `None` once every [`ConnectivityMonitor`] handle is dropped.
    pub async fn next(&mut self) -> Option<ConnectivityEvent> {
        loop {
            self.rx.changed().await.ok()?;
            let online = *self.rx.borrow_and_update();
            if online != self.last {
                self.last = online;
                return Some(ConnectivityEvent::from_level(online));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_online_reports_changes() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        assert!(!monitor.is_online());
        assert!(!monitor.set_online(false));
    }

    #[tokio::test]
    async fn test_events_are_edge_triggered() {
        let monitor = ConnectivityMonitor::new(false);
        let mut events = monitor.subscribe();

        monitor.set_online(true);
        assert_eq!(events.next().await, Some(ConnectivityEvent::Online));

        monitor.set_online(false);
        assert_eq!(events.next().await, Some(ConnectivityEvent::Offline));
    }

    #[tokio::test]
    async fn test_flap_back_to_same_level_is_not_reported() {
        let monitor = ConnectivityMonitor::new(true);
        let mut events = monitor.subscribe();

        monitor.set_online(false);
        monitor.set_online(true);

        let next = tokio::time::timeout(Duration::from_millis(50), events.next()).await;
        assert!(next.is_err(), "no transition should be observed");
    }

    #[tokio::test]
    async fn test_stream_ends_when_monitor_dropped() {
        let monitor = ConnectivityMonitor::new(true);
        let mut events = monitor.subscribe();
        drop(monitor);
        assert_eq!(events.next().await, None);
    }
}
