//! Sync event system.
//!
//! This module provides an event-based view of what the engine is doing:
//! operations being queued, applied, retried, and dead-lettered, drain passes
//! starting and finishing, and connectivity transitions.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

use larder_types::{OperationId, OperationKind};

use crate::coordinator::DrainReport;

/// Events emitted by the sync engine.
///
/// All events are serializable for logging and streaming to clients.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SyncEvent {
    /// An operation was durably appended to the log.
    OperationQueued {
        id: OperationId,
        collection: String,
        kind: OperationKind,
    },
    /// The remote accepted an operation.
    OperationSynced { id: OperationId },
    /// An operation failed transiently and will be retried.
    OperationRetrying {
        id: OperationId,
        attempts: u32,
        #[serde(with = "time::serde::rfc3339")]
        next_attempt_at: OffsetDateTime,
        error: String,
    },
    /// An operation was dead-lettered.
    OperationFailed { id: OperationId, error: String },
    /// A drain pass started.
    DrainStarted,
    /// A drain pass finished.
    DrainCompleted { report: DrainReport },
    /// Connectivity changed.
    ConnectivityChanged { online: bool },
}

/// Sender for sync events.
pub type EventSender = broadcast::Sender<SyncEvent>;

/// Receiver for sync events.
pub type EventReceiver = broadcast::Receiver<SyncEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SyncEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
