//! In-memory remote implementations for testing.
//!
//! [`MockRemote`] records every call made by the sync coordinator and can be
//! told to fail specific calls, fail everything, or respond slowly.
//! [`MockBackend`] keeps stores and imported lines in memory so tests can
//! check exactly what an import left behind after a rollback.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::Date;

use larder_types::{OperationKind, PurchaseLine, SaleLine, Store, StoreDraft, StoreId};

use crate::error::RemoteError;
use crate::traits::{ImportBackend, RemoteService};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A call received by [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub kind: OperationKind,
    pub collection: String,
    /// Target id for deletes.
    pub record_id: Option<String>,
    /// Payload for creates and updates.
    pub payload: Option<Value>,
}

/// A mock [`RemoteService`].
///
/// # Example
///
/// ```
/// use larder_core::{MockRemote, RemoteError, RemoteService};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let remote = MockRemote::new();
/// remote.fail_call(1, RemoteError::transient("connection reset"));
///
/// assert!(remote.create("products", &json!({"name": "Flour"})).await.is_ok());
/// assert!(remote.create("products", &json!({"name": "Salt"})).await.is_err());
/// assert_eq!(remote.call_count(), 2);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockRemote {
    calls: Mutex<Vec<RemoteCall>>,
    call_count: AtomicUsize,
    /// Failures keyed by zero-based call index.
    scheduled_failures: Mutex<HashMap<usize, RemoteError>>,
    fail_all: Mutex<Option<RemoteError>>,
    /// Simulated latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
}

impl MockRemote {
    /// Create a mock that accepts every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call with the given zero-based index.
    pub fn fail_call(&self, index: usize, error: RemoteError) {
        lock(&self.scheduled_failures).insert(index, error);
    }

    /// Fail every call with `error`, or stop doing so with `None`.
    pub fn fail_all(&self, error: Option<RemoteError>) {
        *lock(&self.fail_all) = error;
    }

    /// Set simulated latency.
    ///
    /// Set to `Duration::ZERO` to disable latency simulation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn handle(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).push(call);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if let Some(error) = lock(&self.scheduled_failures).remove(&index) {
            return Err(error);
        }
        if let Some(error) = lock(&self.fail_all).clone() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn create(&self, collection: &str, payload: &Value) -> Result<(), RemoteError> {
        self.handle(RemoteCall {
            kind: OperationKind::Create,
            collection: collection.to_string(),
            record_id: None,
            payload: Some(payload.clone()),
        })
        .await
    }

    async fn update(&self, collection: &str, payload: &Value) -> Result<(), RemoteError> {
        self.handle(RemoteCall {
            kind: OperationKind::Update,
            collection: collection.to_string(),
            record_id: None,
            payload: Some(payload.clone()),
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.handle(RemoteCall {
            kind: OperationKind::Delete,
            collection: collection.to_string(),
            record_id: Some(id.to_string()),
            payload: None,
        })
        .await
    }
}

/// Steps of [`ImportBackend`] that [`MockBackend`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendStep {
    CreateStore,
    DeleteStore,
    InsertPurchaseLines,
    DeletePurchaseLines,
    InsertSaleLines,
    DeleteSaleLines,
    RecomputeDailyCosts,
}

/// A recorded aggregate recompute request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeCall {
    pub store_id: StoreId,
    pub start: Date,
    pub end: Date,
}

/// An in-memory [`ImportBackend`].
#[derive(Debug, Default)]
pub struct MockBackend {
    next_id: AtomicU64,
    stores: Mutex<Vec<Store>>,
    purchase_lines: Mutex<Vec<(String, PurchaseLine)>>,
    sale_lines: Mutex<Vec<(String, SaleLine)>>,
    recomputes: Mutex<Vec<RecomputeCall>>,
    failing: Mutex<HashSet<BackendStep>>,
    /// Fail `CreateStore` only after this many stores have been created.
    fail_store_after: Mutex<Option<usize>>,
}

impl MockBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `step` fail with a transient error.
    pub fn fail_on(&self, step: BackendStep) {
        lock(&self.failing).insert(step);
    }

    /// Stop failing `step`.
    pub fn clear_failure(&self, step: BackendStep) {
        lock(&self.failing).remove(&step);
    }

    /// Let `count` stores be created, then fail store creation.
    pub fn fail_store_creation_after(&self, count: usize) {
        *lock(&self.fail_store_after) = Some(count);
    }

    /// Stores currently present.
    pub fn stores(&self) -> Vec<Store> {
        lock(&self.stores).clone()
    }

    /// Purchase lines currently present.
    pub fn purchase_lines(&self) -> Vec<PurchaseLine> {
        lock(&self.purchase_lines)
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Sale lines currently present.
    pub fn sale_lines(&self) -> Vec<SaleLine> {
        lock(&self.sale_lines)
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Recompute requests received.
    pub fn recomputes(&self) -> Vec<RecomputeCall> {
        lock(&self.recomputes).clone()
    }

    fn check(&self, step: BackendStep) -> Result<(), RemoteError> {
        if lock(&self.failing).contains(&step) {
            Err(RemoteError::transient(format!("mock failure in {:?}", step)))
        } else {
            Ok(())
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl ImportBackend for MockBackend {
    async fn create_store(&self, draft: &StoreDraft, slug: &str) -> Result<Store, RemoteError> {
        self.check(BackendStep::CreateStore)?;
        let mut stores = lock(&self.stores);
        if let Some(limit) = *lock(&self.fail_store_after)
            && stores.len() >= limit
        {
            return Err(RemoteError::transient("mock store limit reached"));
        }
        if stores.iter().any(|s| s.slug == slug) {
            return Err(RemoteError::conflict(format!("slug {} already exists", slug)));
        }

        let store = Store {
            id: StoreId::from(self.next_id("store")),
            name: draft.name.clone(),
            slug: slug.to_string(),
            address: draft.address.clone(),
            currency: draft.currency.clone(),
        };
        stores.push(store.clone());
        Ok(store)
    }

    async fn delete_store(&self, id: &StoreId) -> Result<(), RemoteError> {
        self.check(BackendStep::DeleteStore)?;
        let mut stores = lock(&self.stores);
        let before = stores.len();
        stores.retain(|s| &s.id != id);
        if stores.len() == before {
            return Err(RemoteError::conflict(format!("store {} not found", id)));
        }
        Ok(())
    }

    async fn insert_purchase_lines(&self, lines: &[PurchaseLine]) -> Result<Vec<String>, RemoteError> {
        self.check(BackendStep::InsertPurchaseLines)?;
        let mut table = lock(&self.purchase_lines);
        let ids: Vec<String> = lines.iter().map(|_| self.next_id("purchase")).collect();
        table.extend(ids.iter().cloned().zip(lines.iter().cloned()));
        Ok(ids)
    }

    async fn delete_purchase_lines(&self, ids: &[String]) -> Result<(), RemoteError> {
        self.check(BackendStep::DeletePurchaseLines)?;
        lock(&self.purchase_lines).retain(|(id, _)| !ids.contains(id));
        Ok(())
    }

    async fn insert_sale_lines(&self, lines: &[SaleLine]) -> Result<Vec<String>, RemoteError> {
        self.check(BackendStep::InsertSaleLines)?;
        let mut table = lock(&self.sale_lines);
        let ids: Vec<String> = lines.iter().map(|_| self.next_id("sale")).collect();
        table.extend(ids.iter().cloned().zip(lines.iter().cloned()));
        Ok(ids)
    }

    async fn delete_sale_lines(&self, ids: &[String]) -> Result<(), RemoteError> {
        self.check(BackendStep::DeleteSaleLines)?;
        lock(&self.sale_lines).retain(|(id, _)| !ids.contains(id));
        Ok(())
    }

    async fn recompute_daily_costs(
        &self,
        store_id: &StoreId,
        start: Date,
        end: Date,
    ) -> Result<(), RemoteError> {
        self.check(BackendStep::RecomputeDailyCosts)?;
        lock(&self.recomputes).push(RecomputeCall {
            store_id: store_id.clone(),
            start,
            end,
        });
        Ok(())
    }
}
