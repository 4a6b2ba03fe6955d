//! Core types for queued mutations and sync state.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Kind of remote mutation a queued operation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a new remote record.
    Create,
    /// Update an existing remote record.
    Update,
    /// Delete a remote record.
    Delete,
}

impl OperationKind {
    /// Stable lowercase name, used for storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(ParseError::UnknownKind(s.to_string())),
        }
    }
}

/// Lifecycle status of a queued operation.
///
/// Operations start `Pending`, and leave that state exactly once: either to
/// `Synced` after the remote service acknowledged them, or to `Failed` when
/// they were dead-lettered. Dead-lettered operations may be moved back to
/// `Pending` by an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be applied remotely.
    #[default]
    Pending,
    /// Acknowledged by the remote service.
    Synced,
    /// Dead-lettered: permanently rejected or out of attempts.
    Failed,
}

impl OperationStatus {
    /// Stable lowercase name, used for storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Synced => "synced",
            OperationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "synced" => Ok(OperationStatus::Synced),
            "failed" => Ok(OperationStatus::Failed),
            _ => Err(ParseError::UnknownStatus(s.to_string())),
        }
    }
}

/// Opaque identifier of a queued operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generate a new random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A locally recorded intent to mutate a remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier.
    pub id: OperationId,
    /// Remote collection (table) the mutation targets.
    pub collection: String,
    /// Mutation kind.
    pub kind: OperationKind,
    /// Record payload. For deletes this carries at least the record `id`.
    pub payload: serde_json::Value,
    /// When the operation was enqueued.
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    /// Lifecycle status.
    pub status: OperationStatus,
    /// Number of failed remote attempts so far.
    pub attempts: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Earliest time the next attempt may run (backoff).
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_attempt_at: Option<OffsetDateTime>,
    /// When the remote service acknowledged the operation.
    #[serde(with = "time::serde::rfc3339::option")]
    pub synced_at: Option<OffsetDateTime>,
}

impl QueuedOperation {
    /// Create a new pending operation stamped with the current time.
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: OperationId::new(),
            collection: collection.into(),
            kind,
            payload,
            enqueued_at: OffsetDateTime::now_utc(),
            status: OperationStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            synced_at: None,
        }
    }

    /// Whether the remote service has acknowledged this operation.
    pub fn synced(&self) -> bool {
        self.status == OperationStatus::Synced
    }

    /// Whether this operation may be attempted at `now`.
    ///
    /// Only pending operations whose backoff has elapsed are due.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.status == OperationStatus::Pending && self.next_attempt_at.is_none_or(|t| t <= now)
    }

    /// The remote record id carried in the payload, if any.
    ///
    /// Accepts either a string or a numeric `id` field.
    pub fn record_id(&self) -> Option<String> {
        match self.payload.get("id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Snapshot of the sync engine's state, derived on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether the platform currently reports connectivity.
    pub is_online: bool,
    /// Operations waiting to be applied remotely.
    pub pending_operations: u64,
    /// Operations dead-lettered and awaiting user action.
    pub failed_operations: u64,
    /// Whether a drain pass is running.
    pub sync_in_progress: bool,
    /// When the last drain pass completed.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync: Option<OffsetDateTime>,
}

/// A snapshot cached for offline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    /// Cache key.
    pub key: String,
    /// The cached data.
    pub data: serde_json::Value,
    /// Collection the data belongs to.
    pub collection: String,
    /// When the snapshot was cached.
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
}

impl CachedEntry {
    /// Age of the entry at `now`.
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.cached_at
    }

    /// Whether the entry is younger than `window` at `now`.
    pub fn is_fresh(&self, now: OffsetDateTime, window: time::Duration) -> bool {
        self.age(now) < window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_kind_round_trip() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("upsert".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_operation_status_parse_case_insensitive() {
        assert_eq!(
            "FAILED".parse::<OperationStatus>().unwrap(),
            OperationStatus::Failed
        );
        let err = "gone".parse::<OperationStatus>().unwrap_err();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_new_operation_is_pending_and_due() {
        let op = QueuedOperation::new(OperationKind::Create, "products", json!({"name": "Flour"}));
        assert!(!op.synced());
        assert_eq!(op.attempts, 0);
        assert!(op.is_due(OffsetDateTime::now_utc()));
    }

    #[test]
    fn test_backoff_delays_due() {
        let now = OffsetDateTime::now_utc();
        let mut op = QueuedOperation::new(OperationKind::Update, "products", json!({"id": 1}));
        op.next_attempt_at = Some(now + time::Duration::minutes(1));
        assert!(!op.is_due(now));
        assert!(op.is_due(now + time::Duration::minutes(2)));
    }

    #[test]
    fn test_failed_operation_is_never_due() {
        let mut op = QueuedOperation::new(OperationKind::Delete, "products", json!({"id": 1}));
        op.status = OperationStatus::Failed;
        assert!(!op.is_due(OffsetDateTime::now_utc()));
    }

    #[test]
    fn test_record_id() {
        let op = QueuedOperation::new(OperationKind::Delete, "products", json!({"id": 42}));
        assert_eq!(op.record_id(), Some("42".to_string()));

        let op = QueuedOperation::new(OperationKind::Delete, "products", json!({"id": "abc"}));
        assert_eq!(op.record_id(), Some("abc".to_string()));

        let op = QueuedOperation::new(OperationKind::Delete, "products", json!({"name": "x"}));
        assert_eq!(op.record_id(), None);
    }

    #[test]
    fn test_operation_serialization() {
        let op = QueuedOperation::new(OperationKind::Create, "suppliers", json!({"name": "Metro"}));
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"kind\":\"create\""));
        assert!(json.contains("\"status\":\"pending\""));

        let back: QueuedOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, op.id);
    }

    #[test]
    fn test_cached_entry_freshness() {
        let now = OffsetDateTime::now_utc();
        let entry = CachedEntry {
            key: "dashboard".to_string(),
            data: json!({}),
            collection: "reports".to_string(),
            cached_at: now - time::Duration::minutes(4),
        };
        assert!(entry.is_fresh(now, time::Duration::minutes(5)));
        assert!(!entry.is_fresh(now + time::Duration::minutes(2), time::Duration::minutes(5)));
    }
}
