//! The sync engine facade.
//!
//! [`SyncEngine`] ties the durable operation log, the drain coordinator, the
//! connectivity flag, the status broadcaster, the offline cache and the
//! import workflow together behind one cloneable handle.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use larder_core::{MockBackend, MockRemote, SyncEngine, SyncOptions};
//! use larder_store::Store;
//! use larder_types::OperationKind;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), larder_core::Error> {
//! let engine = SyncEngine::new(
//!     Store::open_in_memory()?,
//!     Arc::new(MockRemote::new()),
//!     Arc::new(MockBackend::new()),
//!     SyncOptions::default(),
//! )?;
//!
//! let _sub = engine.subscribe_status(|status| {
//!     println!("{} pending", status.pending_operations);
//! });
//!
//! engine
//!     .queue_operation(OperationKind::Create, "products", json!({"name": "Flour"}))
//!     .await?;
//! let report = engine.force_sync().await.expect("online and idle");
//! assert_eq!(report.synced, 1);
//!
//! engine.dispose().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use larder_store::{OperationQuery, Store};
use larder_types::{
    CachedEntry, ImportBatch, ImportResult, OperationId, OperationKind, QueuedOperation,
    SyncStatus,
};

use crate::cache::{CachedRead, purge_expired};
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::coordinator::{DrainReport, SyncCoordinator};
use crate::error::Result;
use crate::events::{EventReceiver, SyncEvent};
use crate::import::ImportWorkflow;
use crate::options::SyncOptions;
use crate::status::Subscription;
use crate::traits::{ImportBackend, RemoteService};

struct EngineInner {
    coordinator: Arc<SyncCoordinator>,
    importer: ImportWorkflow,
    options: SyncOptions,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // The driver only holds the coordinator; stop it with the last handle.
        self.coordinator.stop();
    }
}

/// Offline-first mutation queue with background sync.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("coordinator", &self.inner.coordinator)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SyncEngine {
    /// Create an engine over an opened store.
    ///
    /// The background driver is not running until [`start`](Self::start)
    /// is called; until then only [`force_sync`](Self::force_sync) drains.
    pub fn new(
        store: Store,
        remote: Arc<dyn RemoteService>,
        backend: Arc<dyn ImportBackend>,
        options: SyncOptions,
    ) -> Result<Self> {
        options.validate()?;

        let log = Arc::new(Mutex::new(store));
        let coordinator = Arc::new(SyncCoordinator::new(log, remote, &options));
        let importer =
            ImportWorkflow::new(backend).with_compensation_retry(options.compensation_retry.clone());

        Ok(Self {
            inner: Arc::new(EngineInner {
                coordinator,
                importer,
                options,
                driver: StdMutex::new(None),
            }),
        })
    }

    fn coordinator(&self) -> &SyncCoordinator {
        &self.inner.coordinator
    }

    /// Options the engine was built with.
    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    // --- Operation queue ---

    /// Durably enqueue a remote mutation and ask the driver to drain.
    ///
    /// Returns once the operation is committed locally; never waits on the
    /// network.
    pub async fn queue_operation(
        &self,
        kind: OperationKind,
        collection: &str,
        payload: Value,
    ) -> Result<OperationId> {
        let id = self
            .coordinator()
            .with_log(|log| log.enqueue(kind, collection, payload))
            .await?;

        self.coordinator().events().send(SyncEvent::OperationQueued {
            id: id.clone(),
            collection: collection.to_string(),
            kind,
        });
        if self.coordinator().connectivity().is_online() {
            self.request_sync();
        }
        Ok(id)
    }

    /// Ask the background driver for a drain pass without waiting.
    pub fn request_sync(&self) {
        self.coordinator().request_drain();
    }

    /// Run a drain pass now.
    ///
    /// Returns `None` if offline, stopped, or a pass is already running.
    pub async fn force_sync(&self) -> Option<DrainReport> {
        self.coordinator().drain().await
    }

    /// Pending operations in FIFO order.
    pub async fn pending_operations(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self.coordinator().log().lock().await.list_pending()?)
    }

    /// Dead-lettered operations awaiting user action.
    pub async fn failed_operations(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self.coordinator().log().lock().await.list_failed()?)
    }

    /// Query operations with filters.
    pub async fn query_operations(&self, query: &OperationQuery) -> Result<Vec<QueuedOperation>> {
        Ok(self.coordinator().log().lock().await.query_operations(query)?)
    }

    /// Look up an operation by id.
    pub async fn get_operation(&self, id: &OperationId) -> Result<Option<QueuedOperation>> {
        Ok(self.coordinator().log().lock().await.get_operation(id)?)
    }

    /// Move a dead-lettered operation back to the queue.
    ///
    /// Returns `false` if `id` is not a failed operation.
    pub async fn retry_failed(&self, id: &OperationId) -> Result<bool> {
        let requeued = self
            .coordinator()
            .with_log(|log| log.retry_failed(id))
            .await?;
        if requeued {
            info!("Requeued operation {}", id);
            self.request_sync();
        }
        Ok(requeued)
    }

    /// Move every dead-lettered operation back to the queue.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        let requeued = self
            .coordinator()
            .with_log(|log| log.retry_all_failed())
            .await?;
        if requeued > 0 {
            self.request_sync();
        }
        Ok(requeued)
    }

    // --- Status and connectivity ---

    /// Register a callback invoked with every status snapshot.
    pub fn subscribe_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.coordinator().status().subscribe(callback)
    }

    /// Receiver that always holds the latest status snapshot.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.coordinator().status().watch()
    }

    /// The latest status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.coordinator().status().current()
    }

    /// Subscribe to sync events.
    pub fn events(&self) -> EventReceiver {
        self.coordinator().events().subscribe()
    }

    /// Connectivity flag shared with the coordinator.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        self.coordinator().connectivity()
    }

    /// Report platform connectivity.
    ///
    /// Going online triggers a drain through the background driver, even if
    /// the driver is busy or missed a brief offline period.
    /// Returns `true` if the level changed.
    pub async fn set_online(&self, online: bool) -> bool {
        let changed = self.coordinator().connectivity().set_online(online);
        if changed {
            self.coordinator()
                .events()
                .send(SyncEvent::ConnectivityChanged { online });
            self.coordinator().publish_status().await;
            if online {
                self.request_sync();
            }
        }
        changed
    }

    // --- Offline cache ---

    /// Cache a snapshot for offline reads.
    pub async fn cache_snapshot(&self, key: &str, collection: &str, data: &Value) -> Result<CachedEntry> {
        Ok(self
            .coordinator()
            .log()
            .lock()
            .await
            .put_cached(key, collection, data)?)
    }

    /// Read a cached snapshot.
    ///
    /// Entries older than the retention period are treated as absent.
    pub async fn read_cached(&self, key: &str) -> Result<Option<CachedRead>> {
        let entry = self.coordinator().log().lock().await.get_cached(key)?;
        Ok(entry.and_then(|entry| {
            CachedRead::evaluate(
                entry,
                OffsetDateTime::now_utc(),
                self.inner.options.freshness_window,
                self.inner.options.cache_retention,
            )
        }))
    }

    /// Drop expired cache entries and old synced operations.
    pub async fn purge_expired(&self) -> Result<()> {
        purge_expired(self.coordinator().log(), self.inner.options.cache_retention).await
    }

    // --- Import ---

    /// Run the transactional import workflow.
    ///
    /// On error, every entity written by this call has been compensated
    /// (or logged for manual cleanup).
    pub async fn save_import_batch(&self, batch: &ImportBatch) -> Result<ImportResult> {
        self.inner.importer.run(batch).await
    }

    // --- Lifecycle ---

    /// Spawn the background driver.
    ///
    /// Calling this while the driver runs is a no-op. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) {
        let mut driver = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Sync driver already running");
            return;
        }
        if self.coordinator().shutdown_token().is_cancelled() {
            warn!("Sync engine was stopped, not starting driver");
            return;
        }

        *driver = Some(tokio::spawn(run_driver(
            Arc::clone(&self.inner.coordinator),
            self.inner.options.retry_interval,
            self.inner.options.cache_retention,
        )));
    }

    /// Returns `true` while the background driver runs.
    pub fn is_running(&self) -> bool {
        self.inner
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop draining: abort the current pass and refuse new ones.
    pub fn stop_draining(&self) {
        self.coordinator().stop();
    }

    /// Stop draining, wait for the driver to exit, and drop every status
    /// subscriber.
    pub async fn dispose(&self) {
        self.stop_draining();

        let handle = self
            .inner
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Sync driver ended abnormally: {}", e);
        }

        self.coordinator().status().clear();
        info!("Sync engine disposed");
    }
}

async fn run_driver(
    coordinator: Arc<SyncCoordinator>,
    retry_interval: Duration,
    cache_retention: Duration,
) {
    let shutdown = coordinator.shutdown_token().clone();
    let mut edges = coordinator.connectivity().subscribe();
    let mut ticker = tokio::time::interval(retry_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Sync driver started (retry interval {:?})", retry_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = coordinator.wake().notified() => {
                coordinator.drain().await;
            }
            edge = edges.next() => match edge {
                Some(ConnectivityEvent::Online) => {
                    info!("Back online, draining queued operations");
                    coordinator.drain().await;
                }
                Some(ConnectivityEvent::Offline) => {
                    debug!("Offline, queued operations will wait");
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Err(e) = purge_expired(coordinator.log(), cache_retention).await {
                    warn!("Failed to purge expired data: {}", e);
                }
                coordinator.drain().await;
            }
        }
    }

    info!("Sync driver stopped");
}
