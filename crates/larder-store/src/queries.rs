//! Query builder for queued operations.
//!
//! # Example
//!
//! ```
//! use larder_store::{Store, OperationQuery};
//! use larder_types::OperationStatus;
//!
//! let store = Store::open_in_memory()?;
//!
//! // Most recent dead-lettered product mutations
//! let query = OperationQuery::new()
//!     .status(OperationStatus::Failed)
//!     .collection("products")
//!     .newest_first()
//!     .limit(20);
//!
//! let failed = store.query_operations(&query)?;
//! # Ok::<(), larder_store::Error>(())
//! ```

use larder_types::OperationStatus;

pub(crate) const OPERATION_COLUMNS: &str = "id, collection, kind, payload, enqueued_at, status, \
     attempts, last_error, next_attempt_at, synced_at";

/// Fluent query builder for [`Store::query_operations`](crate::Store::query_operations).
///
/// By default, results are in FIFO order (oldest enqueued first) and
/// include every status.
#[derive(Debug, Default, Clone)]
pub struct OperationQuery {
    /// Filter by lifecycle status.
    pub status: Option<OperationStatus>,
    /// Filter by remote collection.
    pub collection: Option<String>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by enqueue time descending.
    pub newest_first: bool,
}

impl OperationQuery {
    /// Create a query matching every operation in FIFO order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only include operations with this status.
    pub fn status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Only include operations targeting this collection.
    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = Some(collection.to_string());
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results newest first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = self.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref collection) = self.collection {
            conditions.push("collection = ?");
            params.push(Box::new(collection.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT {} FROM pending_operations {} ORDER BY enqueued_at {}, seq {}",
            OPERATION_COLUMNS, where_clause, order, order
        );

        // SQLite requires LIMIT whenever OFFSET is present
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query_is_fifo() {
        let sql = OperationQuery::new().build_sql();
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY enqueued_at ASC, seq ASC"));
    }

    #[test]
    fn test_filters_build_where() {
        let query = OperationQuery::new()
            .status(OperationStatus::Pending)
            .collection("products");
        let (where_clause, params) = query.build_where();
        assert_eq!(where_clause, "WHERE status = ? AND collection = ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_pagination() {
        let sql = OperationQuery::new().limit(10).offset(20).build_sql();
        assert!(sql.ends_with("LIMIT 10 OFFSET 20"));

        let sql = OperationQuery::new().offset(5).build_sql();
        assert!(sql.ends_with("LIMIT -1 OFFSET 5"));
    }

    #[test]
    fn test_newest_first() {
        let sql = OperationQuery::new().newest_first().build_sql();
        assert!(sql.contains("ORDER BY enqueued_at DESC, seq DESC"));
    }
}
