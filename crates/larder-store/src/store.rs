//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use larder_types::{CachedEntry, OperationId, OperationKind, OperationStatus, QueuedOperation};

use crate::error::{Error, Result};
use crate::models::{CachedRow, OperationCounts};
use crate::queries::{OPERATION_COLUMNS, OperationQuery};
use crate::schema;

/// SQLite-backed durable operation log and offline cache.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening operation log at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

pub(crate) fn to_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(ms: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|e| Error::InvalidTimestamp(format!("{ms}: {e}")))
}

struct OperationRow {
    id: String,
    collection: String,
    kind: String,
    payload: String,
    enqueued_at: i64,
    status: String,
    attempts: i64,
    last_error: Option<String>,
    next_attempt_at: Option<i64>,
    synced_at: Option<i64>,
}

impl OperationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            collection: row.get(1)?,
            kind: row.get(2)?,
            payload: row.get(3)?,
            enqueued_at: row.get(4)?,
            status: row.get(5)?,
            attempts: row.get(6)?,
            last_error: row.get(7)?,
            next_attempt_at: row.get(8)?,
            synced_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<QueuedOperation> {
        let kind: OperationKind = self
            .kind
            .parse()
            .map_err(|e: larder_types::ParseError| Error::InvalidOperation(e.to_string()))?;
        let status: OperationStatus = self
            .status
            .parse()
            .map_err(|e: larder_types::ParseError| Error::InvalidOperation(e.to_string()))?;

        Ok(QueuedOperation {
            id: OperationId::from(self.id),
            collection: self.collection,
            kind,
            payload: serde_json::from_str(&self.payload)?,
            enqueued_at: from_millis(self.enqueued_at)?,
            status,
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
            last_error: self.last_error,
            next_attempt_at: self.next_attempt_at.map(from_millis).transpose()?,
            synced_at: self.synced_at.map(from_millis).transpose()?,
        })
    }
}

// Operation log
impl Store {
    /// Persist a new pending operation and return its id.
    ///
    /// The row is committed before this returns; an error here means the
    /// mutation was not recorded.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        collection: &str,
        payload: serde_json::Value,
    ) -> Result<OperationId> {
        let op = QueuedOperation::new(kind, collection, payload);
        self.insert_operation(&op)?;
        Ok(op.id)
    }

    /// Persist a fully built operation.
    pub fn insert_operation(&self, op: &QueuedOperation) -> Result<()> {
        if op.collection.trim().is_empty() {
            return Err(Error::InvalidOperation(
                "collection cannot be empty".to_string(),
            ));
        }

        let payload = serde_json::to_string(&op.payload)?;

        self.conn.execute(
            "INSERT INTO pending_operations (id, collection, kind, payload, enqueued_at,
             status, attempts, last_error, next_attempt_at, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                op.id.as_str(),
                op.collection,
                op.kind.as_str(),
                payload,
                to_millis(op.enqueued_at),
                op.status.as_str(),
                op.attempts,
                op.last_error,
                op.next_attempt_at.map(to_millis),
                op.synced_at.map(to_millis),
            ],
        )?;

        debug!("Enqueued {} {} ({})", op.kind, op.collection, op.id);
        Ok(())
    }

    /// All pending operations in FIFO order.
    ///
    /// Synced and dead-lettered operations are excluded.
    pub fn list_pending(&self) -> Result<Vec<QueuedOperation>> {
        self.query_operations(&OperationQuery::new().status(OperationStatus::Pending))
    }

    /// All dead-lettered operations in FIFO order.
    pub fn list_failed(&self) -> Result<Vec<QueuedOperation>> {
        self.query_operations(&OperationQuery::new().status(OperationStatus::Failed))
    }

    /// Query operations with filters.
    pub fn query_operations(&self, query: &OperationQuery) -> Result<Vec<QueuedOperation>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), OperationRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(OperationRow::decode).collect()
    }

    /// Get a single operation by id.
    pub fn get_operation(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
        let sql = format!(
            "SELECT {} FROM pending_operations WHERE id = ?",
            OPERATION_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, [id.as_str()], OperationRow::from_row)
            .optional()?;

        row.map(OperationRow::decode).transpose()
    }

    /// Mark an operation as acknowledged by the remote service.
    ///
    /// Idempotent: returns `false` and logs a warning if the operation is
    /// unknown or already synced.
    pub fn mark_synced(&self, id: &OperationId) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE pending_operations
             SET status = 'synced', synced_at = ?2, next_attempt_at = NULL
             WHERE id = ?1 AND status != 'synced'",
            rusqlite::params![id.as_str(), to_millis(OffsetDateTime::now_utc())],
        )?;

        if changed == 0 {
            warn!("mark_synced: operation {} is unknown or already synced", id);
        }
        Ok(changed > 0)
    }

    /// Record a failed attempt and when the next attempt may run.
    ///
    /// Returns the new attempt count, or `None` if the operation is not pending.
    pub fn record_failure(
        &self,
        id: &OperationId,
        error: &str,
        next_attempt_at: Option<OffsetDateTime>,
    ) -> Result<Option<u32>> {
        let attempts: Option<i64> = self
            .conn
            .query_row(
                "UPDATE pending_operations
                 SET attempts = attempts + 1, last_error = ?2, next_attempt_at = ?3
                 WHERE id = ?1 AND status = 'pending'
                 RETURNING attempts",
                rusqlite::params![id.as_str(), error, next_attempt_at.map(to_millis)],
                |row| row.get(0),
            )
            .optional()?;

        if attempts.is_none() {
            warn!("record_failure: operation {} is not pending", id);
        }
        Ok(attempts.map(|a| u32::try_from(a).unwrap_or(u32::MAX)))
    }

    /// Dead-letter a pending operation so it leaves the retry queue.
    pub fn mark_failed(&self, id: &OperationId, error: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE pending_operations
             SET status = 'failed', last_error = ?2, next_attempt_at = NULL
             WHERE id = ?1 AND status = 'pending'",
            rusqlite::params![id.as_str(), error],
        )?;

        if changed == 0 {
            warn!("mark_failed: operation {} is not pending", id);
        }
        Ok(changed > 0)
    }

    /// Move a dead-lettered operation back to the pending queue.
    ///
    /// Attempts and backoff are reset; the original enqueue position is kept.
    pub fn retry_failed(&self, id: &OperationId) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE pending_operations
             SET status = 'pending', attempts = 0, next_attempt_at = NULL
             WHERE id = ?1 AND status = 'failed'",
            [id.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Move every dead-lettered operation back to the pending queue.
    pub fn retry_all_failed(&self) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE pending_operations
             SET status = 'pending', attempts = 0, next_attempt_at = NULL
             WHERE status = 'failed'",
            [],
        )?;
        if changed > 0 {
            info!("Requeued {} dead-lettered operations", changed);
        }
        Ok(changed)
    }

    /// Number of pending operations.
    pub fn count_pending(&self) -> Result<u64> {
        self.count_with_status(OperationStatus::Pending)
    }

    /// Number of dead-lettered operations.
    pub fn count_failed(&self) -> Result<u64> {
        self.count_with_status(OperationStatus::Failed)
    }

    fn count_with_status(&self, status: OperationStatus) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_operations WHERE status = ?",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Operation counts per status in a single query.
    pub fn counts(&self) -> Result<OperationCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM pending_operations GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut counts = OperationCounts::default();
        for (status, count) in rows {
            match status.parse::<OperationStatus>() {
                Ok(OperationStatus::Pending) => counts.pending = count as u64,
                Ok(OperationStatus::Synced) => counts.synced = count as u64,
                Ok(OperationStatus::Failed) => counts.failed = count as u64,
                Err(e) => warn!("Ignoring rows with {}", e),
            }
        }
        Ok(counts)
    }

    /// Physically remove synced operations acknowledged before `before`.
    pub fn purge_synced(&self, before: OffsetDateTime) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM pending_operations WHERE status = 'synced' AND synced_at < ?",
            [to_millis(before)],
        )?;
        if removed > 0 {
            debug!("Purged {} synced operations", removed);
        }
        Ok(removed)
    }
}

// Offline read cache
impl Store {
    /// Cache a snapshot, replacing any previous entry for the key.
    pub fn put_cached(
        &self,
        key: &str,
        collection: &str,
        data: &serde_json::Value,
    ) -> Result<CachedEntry> {
        let cached_at = OffsetDateTime::now_utc();
        self.conn.execute(
            "INSERT INTO cached_data (key, collection, data, cached_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                collection = ?2,
                data = ?3,
                cached_at = ?4",
            rusqlite::params![key, collection, serde_json::to_string(data)?, to_millis(cached_at)],
        )?;

        Ok(CachedEntry {
            key: key.to_string(),
            data: data.clone(),
            collection: collection.to_string(),
            cached_at: from_millis(to_millis(cached_at))?,
        })
    }

    /// Get a cached snapshot by key, regardless of age.
    pub fn get_cached(&self, key: &str) -> Result<Option<CachedEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT key, collection, data, cached_at FROM cached_data WHERE key = ?",
                [key],
                |row| {
                    Ok(CachedRow {
                        key: row.get(0)?,
                        collection: row.get(1)?,
                        data: row.get(2)?,
                        cached_at: row.get(3)?,
                    })
                },
            )
            .optional()?;

        row.map(CachedRow::decode).transpose()
    }

    /// All cached snapshots of a collection, newest first.
    pub fn list_cached(&self, collection: &str) -> Result<Vec<CachedEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, collection, data, cached_at FROM cached_data
             WHERE collection = ? ORDER BY cached_at DESC",
        )?;
        let rows = stmt
            .query_map([collection], |row| {
                Ok(CachedRow {
                    key: row.get(0)?,
                    collection: row.get(1)?,
                    data: row.get(2)?,
                    cached_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(CachedRow::decode).collect()
    }

    /// Remove cached snapshots older than `before`.
    pub fn purge_cache(&self, before: OffsetDateTime) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM cached_data WHERE cached_at < ?", [to_millis(before)])?;
        if removed > 0 {
            debug!("Purged {} expired cache entries", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn enqueue_n(store: &Store, n: usize) -> Vec<OperationId> {
        (0..n)
            .map(|i| {
                store
                    .enqueue(OperationKind::Create, "products", json!({"name": format!("p{i}")}))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_pending().unwrap().is_empty());
        assert_eq!(store.counts().unwrap(), OperationCounts::default());
    }

    #[test]
    fn test_enqueue_and_list_pending_fifo() {
        let store = Store::open_in_memory().unwrap();
        let ids = enqueue_n(&store, 3);

        let pending = store.list_pending().unwrap();
        let listed: Vec<_> = pending.iter().map(|op| op.id.clone()).collect();
        assert_eq!(listed, ids);
        assert!(pending.iter().all(|op| !op.synced()));
    }

    #[test]
    fn test_enqueue_rejects_empty_collection() {
        let store = Store::open_in_memory().unwrap();
        let result = store.enqueue(OperationKind::Create, "  ", json!({}));
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
        assert_eq!(store.count_pending().unwrap(), 0);
    }

    #[test]
    fn test_payload_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let payload = json!({"id": 7, "price": "4.20", "tags": ["a", "b"]});
        let id = store
            .enqueue(OperationKind::Update, "products", payload.clone())
            .unwrap();

        let op = store.get_operation(&id).unwrap().unwrap();
        assert_eq!(op.payload, payload);
        assert_eq!(op.kind, OperationKind::Update);
        assert_eq!(op.collection, "products");
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let ids = enqueue_n(&store, 2);

        assert!(store.mark_synced(&ids[0]).unwrap());
        let after_once = store.count_pending().unwrap();
        assert!(!store.mark_synced(&ids[0]).unwrap());
        assert_eq!(store.count_pending().unwrap(), after_once);
        assert_eq!(after_once, 1);

        let op = store.get_operation(&ids[0]).unwrap().unwrap();
        assert!(op.synced());
        assert!(op.synced_at.is_some());
    }

    #[test]
    fn test_mark_synced_unknown_id_is_noop() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.mark_synced(&OperationId::from("missing")).unwrap());
    }

    #[test]
    fn test_record_failure_increments_attempts() {
        let store = Store::open_in_memory().unwrap();
        let ids = enqueue_n(&store, 1);
        let next = OffsetDateTime::now_utc() + time::Duration::seconds(30);

        assert_eq!(store.record_failure(&ids[0], "timeout", Some(next)).unwrap(), Some(1));
        assert_eq!(store.record_failure(&ids[0], "503", Some(next)).unwrap(), Some(2));

        let op = store.get_operation(&ids[0]).unwrap().unwrap();
        assert_eq!(op.attempts, 2);
        assert_eq!(op.last_error.as_deref(), Some("503"));
        assert!(op.next_attempt_at.is_some());
        // Still pending
        assert_eq!(store.count_pending().unwrap(), 1);
    }

    #[test]
    fn test_record_failure_on_synced_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        let ids = enqueue_n(&store, 1);
        store.mark_synced(&ids[0]).unwrap();
        assert_eq!(store.record_failure(&ids[0], "late", None).unwrap(), None);
    }

    #[test]
    fn test_dead_letter_and_retry() {
        let store = Store::open_in_memory().unwrap();
        let ids = enqueue_n(&store, 3);

        assert!(store.mark_failed(&ids[1], "validation: name required").unwrap());
        let pending: Vec<_> = store.list_pending().unwrap().into_iter().map(|o| o.id).collect();
        assert_eq!(pending, vec![ids[0].clone(), ids[2].clone()]);
        assert_eq!(store.count_failed().unwrap(), 1);

        let failed = store.list_failed().unwrap();
        assert_eq!(failed[0].last_error.as_deref(), Some("validation: name required"));

        assert!(store.retry_failed(&ids[1]).unwrap());
        let pending: Vec<_> = store.list_pending().unwrap().into_iter().map(|o| o.id).collect();
        // Requeued operation keeps its original FIFO position
        assert_eq!(pending, ids);
        assert_eq!(store.get_operation(&ids[1]).unwrap().unwrap().attempts, 0);
    }

    #[test]
    fn test_retry_all_failed() {
        let store = Store::open_in_memory().unwrap();
        let ids = enqueue_n(&store, 3);
        store.mark_failed(&ids[0], "x").unwrap();
        store.mark_failed(&ids[2], "y").unwrap();

        assert_eq!(store.retry_all_failed().unwrap(), 2);
        assert_eq!(store.count_failed().unwrap(), 0);
        assert_eq!(store.count_pending().unwrap(), 3);
    }

    #[test]
    fn test_counts() {
        let store = Store::open_in_memory().unwrap();
        let ids = enqueue_n(&store, 4);
        store.mark_synced(&ids[0]).unwrap();
        store.mark_failed(&ids[1], "conflict").unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.synced, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_query_by_collection() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue(OperationKind::Create, "products", json!({})).unwrap();
        store.enqueue(OperationKind::Create, "suppliers", json!({})).unwrap();

        let ops = store
            .query_operations(&OperationQuery::new().collection("suppliers"))
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].collection, "suppliers");
    }

    #[test]
    fn test_purge_synced() {
        let store = Store::open_in_memory().unwrap();
        let ids = enqueue_n(&store, 2);
        store.mark_synced(&ids[0]).unwrap();

        let removed = store
            .purge_synced(OffsetDateTime::now_utc() + time::Duration::seconds(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_operation(&ids[0]).unwrap().is_none());
        assert_eq!(store.count_pending().unwrap(), 1);
    }

    #[test]
    fn test_operations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");

        let ids = {
            let store = Store::open(&path).unwrap();
            enqueue_n(&store, 2)
        };

        let store = Store::open(&path).unwrap();
        let pending: Vec<_> = store.list_pending().unwrap().into_iter().map(|o| o.id).collect();
        assert_eq!(pending, ids);
    }

    #[test]
    fn test_cache_put_get_and_replace() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_cached("dashboard").unwrap().is_none());

        store.put_cached("dashboard", "reports", &json!({"v": 1})).unwrap();
        store.put_cached("dashboard", "reports", &json!({"v": 2})).unwrap();

        let entry = store.get_cached("dashboard").unwrap().unwrap();
        assert_eq!(entry.data, json!({"v": 2}));
        assert_eq!(entry.collection, "reports");
    }

    #[test]
    fn test_list_cached_by_collection() {
        let store = Store::open_in_memory().unwrap();
        store.put_cached("a", "reports", &json!(1)).unwrap();
        store.put_cached("b", "reports", &json!(2)).unwrap();
        store.put_cached("c", "products", &json!(3)).unwrap();

        let reports = store.list_cached("reports").unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|e| e.collection == "reports"));
    }

    #[test]
    fn test_purge_cache() {
        let store = Store::open_in_memory().unwrap();
        store.put_cached("old", "reports", &json!(null)).unwrap();

        assert_eq!(store.purge_cache(OffsetDateTime::now_utc() - time::Duration::days(1)).unwrap(), 0);
        assert_eq!(store.purge_cache(OffsetDateTime::now_utc() + time::Duration::seconds(1)).unwrap(), 1);
        assert!(store.get_cached("old").unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_pending_count_tracks_enqueue_and_sync(n in 0usize..20, synced in 0usize..20) {
            let store = Store::open_in_memory().unwrap();
            let ids = enqueue_n(&store, n);
            prop_assert_eq!(store.count_pending().unwrap(), n as u64);

            let to_sync = synced.min(n);
            for id in &ids[..to_sync] {
                store.mark_synced(id).unwrap();
                // Marking twice never double-counts
                store.mark_synced(id).unwrap();
            }
            prop_assert_eq!(store.count_pending().unwrap(), (n - to_sync) as u64);
        }
    }
}
