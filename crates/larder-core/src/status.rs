//! Sync status publication.
//!
//! The engine publishes a fresh [`SyncStatus`] snapshot whenever any of its
//! fields change. Consumers either register a callback with
//! [`StatusBroadcaster::subscribe`] or hold a [`watch`] receiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use larder_types::SyncStatus;

type Callback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

struct BroadcasterInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    latest: watch::Sender<SyncStatus>,
}

/// Fan-out of status snapshots to registered callbacks.
///
/// Callbacks run synchronously on the publishing task and must not block.
#[derive(Clone)]
pub struct StatusBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl std::fmt::Debug for StatusBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .field("current", &self.current())
            .finish()
    }
}

impl StatusBroadcaster {
    /// Create a broadcaster holding `initial` as the current snapshot.
    pub fn new(initial: SyncStatus) -> Self {
        let (latest, _) = watch::channel(initial);
        Self {
            inner: Arc::new(BroadcasterInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                latest,
            }),
        }
    }

    /// Register a callback invoked with every published snapshot.
    ///
    /// The callback stays registered until the returned [`Subscription`]
    /// is dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.inner.latest.subscribe()
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> SyncStatus {
        self.inner.latest.borrow().clone()
    }

    /// Publish a snapshot to every subscriber.
    pub fn publish(&self, status: SyncStatus) {
        self.inner.latest.send_replace(status.clone());

        let callbacks: Vec<Callback> = self
            .lock_subscribers()
            .iter()
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in callbacks {
            callback(&status);
        }
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// Drop every registered callback.
    pub fn clear(&self) {
        self.lock_subscribers().clear();
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        // Callbacks never run under this lock.
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(SyncStatus::default())
    }
}

/// Handle keeping a status callback registered.
#[must_use = "dropping a Subscription unregisters its callback"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    inner: Weak<BroadcasterInner>,
}

impl Subscription {
    /// Unregister the callback now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut subscribers = inner
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscribers.retain(|s| s.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(pending: u64) -> SyncStatus {
        SyncStatus {
            pending_operations: pending,
            ..SyncStatus::default()
        }
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let broadcaster = StatusBroadcaster::default();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen_a);
        let _sub_a = broadcaster.subscribe(move |s| a.lock().unwrap().push(s.pending_operations));
        let b = Arc::clone(&seen_b);
        let _sub_b = broadcaster.subscribe(move |s| b.lock().unwrap().push(s.pending_operations));

        broadcaster.publish(status(3));
        broadcaster.publish(status(2));

        assert_eq!(*seen_a.lock().unwrap(), vec![3, 2]);
        assert_eq!(*seen_b.lock().unwrap(), vec![3, 2]);
        assert_eq!(broadcaster.current().pending_operations, 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let broadcaster = StatusBroadcaster::default();
        let seen = Arc::new(Mutex::new(0u32));

        let s = Arc::clone(&seen);
        let sub = broadcaster.subscribe(move |_| *s.lock().unwrap() += 1);
        broadcaster.publish(status(1));
        sub.unsubscribe();
        broadcaster.publish(status(0));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_clear_removes_all() {
        let broadcaster = StatusBroadcaster::default();
        let _a = broadcaster.subscribe(|_| {});
        let _b = broadcaster.subscribe(|_| {});
        assert_eq!(broadcaster.subscriber_count(), 2);

        broadcaster.clear();
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_broadcaster() {
        let broadcaster = StatusBroadcaster::default();
        let sub = broadcaster.subscribe(|_| {});
        drop(broadcaster);
        drop(sub);
    }

    #[tokio::test]
    async fn test_watch_sees_latest() {
        let broadcaster = StatusBroadcaster::default();
        let mut rx = broadcaster.watch();
        broadcaster.publish(status(5));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().pending_operations, 5);
    }
}
