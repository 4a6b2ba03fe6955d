//! Trait abstractions for the remote side of the engine.
//!
//! [`RemoteService`] applies queued mutations; [`ImportBackend`] performs the
//! steps of a batch import and their compensations. Both are implemented by
//! `HttpRemote` (feature `http-remote`) for a PostgREST-style API and by
//! the mocks in [`crate::mock`] for testing.

use async_trait::async_trait;
use serde_json::Value;
use time::Date;

use larder_types::{PurchaseLine, SaleLine, Store, StoreDraft, StoreId};

use crate::error::RemoteError;

/// Remote data service that queued operations are replayed against.
///
/// Implementations must classify every failure with a
/// [`RemoteErrorKind`](crate::RemoteErrorKind); the coordinator relies on it
/// to decide between retrying and dead-lettering.
///
/// # Example
///
/// ```ignore
/// use larder_core::{RemoteService, RemoteError};
/// use serde_json::json;
///
/// async fn rename<R: RemoteService>(remote: &R) -> Result<(), RemoteError> {
///     remote.update("products", &json!({"id": 7, "name": "Rye flour"})).await
/// }
/// ```
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Insert a new record into `collection`.
    async fn create(&self, collection: &str, payload: &Value) -> Result<(), RemoteError>;

    /// Update the record identified by `payload["id"]`.
    async fn update(&self, collection: &str, payload: &Value) -> Result<(), RemoteError>;

    /// Delete the record with the given id.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;
}

/// Remote operations needed by the import workflow.
///
/// Every insert has a matching delete used as its compensation.
#[async_trait]
pub trait ImportBackend: Send + Sync {
    /// Create a store and return it with its assigned id.
    async fn create_store(&self, draft: &StoreDraft, slug: &str) -> Result<Store, RemoteError>;

    /// Delete a store created by [`create_store`](Self::create_store).
    async fn delete_store(&self, id: &StoreId) -> Result<(), RemoteError>;

    /// Bulk-insert purchase lines, returning the ids of the new rows.
    async fn insert_purchase_lines(&self, lines: &[PurchaseLine]) -> Result<Vec<String>, RemoteError>;

    /// Delete purchase lines by id.
    async fn delete_purchase_lines(&self, ids: &[String]) -> Result<(), RemoteError>;

    /// Bulk-insert sale lines, returning the ids of the new rows.
    async fn insert_sale_lines(&self, lines: &[SaleLine]) -> Result<Vec<String>, RemoteError>;

    /// Delete sale lines by id.
    async fn delete_sale_lines(&self, ids: &[String]) -> Result<(), RemoteError>;

    /// Recompute the derived daily cost aggregates for a store over a
    /// date range (inclusive).
    async fn recompute_daily_costs(
        &self,
        store_id: &StoreId,
        start: Date,
        end: Date,
    ) -> Result<(), RemoteError>;
}
