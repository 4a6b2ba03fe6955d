//! Drain passes over the operation log.
//!
//! A drain pass replays every due pending operation, oldest first, against
//! the [`RemoteService`]. Each operation is applied independently: success
//! marks it synced, a transient failure schedules a retry with backoff, and a
//! permanent failure (or exhausted retries) dead-letters it. One operation
//! failing never prevents later operations in the same pass from being tried.
//!
//! ```text
//!            drain()                 log empty / all tried
//!   Idle ───────────────▶ Draining ──────────────────────▶ Idle
//!    ▲   online, not busy     │
//!    │                        │ offline or stop requested
//!    └────────────────────────┘ (remaining items stay pending)
//! ```

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use larder_store::Store;
use larder_types::{OperationKind, QueuedOperation, SyncStatus};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, RemoteError, Result};
use crate::events::{EventDispatcher, SyncEvent};
use crate::guard::DrainGuard;
use crate::options::SyncOptions;
use crate::retry::{RetryPolicy, is_retryable};
use crate::status::StatusBroadcaster;
use crate::traits::RemoteService;

/// Outcome of a single drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Operations sent to the remote.
    pub attempted: usize,
    /// Operations the remote accepted.
    pub synced: usize,
    /// Operations that failed transiently and were rescheduled.
    pub retried: usize,
    /// Operations moved to the failed state.
    pub dead_lettered: usize,
    /// Pending operations not yet due because of backoff.
    pub skipped: usize,
    /// The pass stopped early because connectivity was lost.
    pub interrupted: bool,
    /// The pass stopped early because shutdown was requested.
    pub cancelled: bool,
}

/// Drives drain passes and publishes the resulting status.
pub struct SyncCoordinator {
    log: Arc<Mutex<Store>>,
    remote: Arc<dyn RemoteService>,
    connectivity: ConnectivityMonitor,
    status: StatusBroadcaster,
    events: EventDispatcher,
    retry: RetryPolicy,
    call_timeout: Duration,
    draining: AtomicBool,
    rerun_requested: AtomicBool,
    wake: Notify,
    last_sync: StdMutex<Option<OffsetDateTime>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("online", &self.connectivity.is_online())
            .field("draining", &self.is_draining())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

enum CallOutcome {
    Done(Result<()>),
    Cancelled,
}

impl SyncCoordinator {
    /// Create a coordinator over `log` replaying against `remote`.
    ///
    /// The initial status reflects whatever the log already holds, so work
    /// left over from a previous run is visible immediately.
    pub fn new(log: Arc<Mutex<Store>>, remote: Arc<dyn RemoteService>, options: &SyncOptions) -> Self {
        let coordinator = Self {
            log,
            remote,
            connectivity: ConnectivityMonitor::new(options.start_online),
            status: StatusBroadcaster::new(SyncStatus {
                is_online: options.start_online,
                ..SyncStatus::default()
            }),
            events: EventDispatcher::new(options.event_capacity),
            retry: options.retry.clone(),
            call_timeout: options.call_timeout,
            draining: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            wake: Notify::new(),
            last_sync: StdMutex::new(None),
            shutdown: CancellationToken::new(),
        };
        if let Ok(log) = coordinator.log.try_lock() {
            coordinator.publish_locked(&log);
        }
        coordinator
    }

    /// Shared handle to the operation log.
    pub fn log(&self) -> &Arc<Mutex<Store>> {
        &self.log
    }

    /// Connectivity flag consulted before and during each pass.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Status fan-out.
    pub fn status(&self) -> &StatusBroadcaster {
        &self.status
    }

    /// Event fan-out.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Token cancelled by [`stop`](Self::stop).
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Returns `true` while a pass is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// When the last pass completed.
    pub fn last_sync(&self) -> Option<OffsetDateTime> {
        *self
            .last_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask the background driver for a pass without waiting.
    pub fn request_drain(&self) {
        self.wake.notify_one();
    }

    /// Notified whenever a drain pass is requested.
    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }

    /// Abort the current pass and refuse to start new ones.
    ///
    /// An in-flight remote call is abandoned; its operation stays pending.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Stopping sync coordinator");
            self.shutdown.cancel();
        }
    }

    /// Run one drain pass.
    ///
    /// Returns `None` without touching the log when offline, stopped, or
    /// when another pass is already running. In the last case a follow-up
    /// pass is requested once the running one finishes.
    pub async fn drain(&self) -> Option<DrainReport> {
        if self.shutdown.is_cancelled() {
            debug!("Coordinator stopped, not draining");
            return None;
        }
        if !self.connectivity.is_online() {
            debug!("Offline, not draining");
            return None;
        }
        let guard = match DrainGuard::try_acquire(&self.draining) {
            Some(guard) => guard,
            None => {
                debug!("Drain already in progress, requesting another pass");
                self.rerun_requested.store(true, Ordering::Release);
                // The running pass may have finished between the two checks.
                if !self.is_draining() {
                    self.take_rerun();
                }
                return None;
            }
        };

        self.events.send(SyncEvent::DrainStarted);
        self.publish_status().await;

        let report = self.run_pass().await;

        drop(guard);
        self.take_rerun();
        *self
            .last_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(OffsetDateTime::now_utc());
        self.publish_status().await;

        info!(
            "Drain finished: {} attempted, {} synced, {} retried, {} dead-lettered, {} not yet due",
            report.attempted, report.synced, report.retried, report.dead_lettered, report.skipped
        );
        self.events.send(SyncEvent::DrainCompleted {
            report: report.clone(),
        });
        Some(report)
    }

    fn take_rerun(&self) {
        if self.rerun_requested.swap(false, Ordering::AcqRel) {
            self.wake.notify_one();
        }
    }

    async fn run_pass(&self) -> DrainReport {
        let mut report = DrainReport::default();

        let pending = match self.log.lock().await.list_pending() {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to read pending operations: {}", e);
                return report;
            }
        };
        if pending.is_empty() {
            return report;
        }

        let now = OffsetDateTime::now_utc();
        debug!("Draining {} pending operation(s)", pending.len());

        for op in pending {
            if self.shutdown.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if !self.connectivity.is_online() {
                info!("Connectivity lost, ending drain pass early");
                report.interrupted = true;
                break;
            }
            if !op.is_due(now) {
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            match self.call_remote(&op).await {
                CallOutcome::Cancelled => {
                    info!("Drain cancelled while applying {}", op.id);
                    report.cancelled = true;
                    break;
                }
                CallOutcome::Done(Ok(())) => {
                    self.handle_success(&op, &mut report).await;
                }
                CallOutcome::Done(Err(e)) => {
                    self.handle_failure(&op, e, &mut report).await;
                }
            }
        }

        report
    }

    async fn call_remote(&self, op: &QueuedOperation) -> CallOutcome {
        let call = tokio::time::timeout(self.call_timeout, apply(self.remote.as_ref(), op));
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => CallOutcome::Cancelled,
            result = call => CallOutcome::Done(match result {
                Ok(inner) => inner,
                Err(_) => Err(Error::timeout(
                    format!("{} {}", op.kind, op.collection),
                    self.call_timeout,
                )),
            }),
        }
    }

    async fn handle_success(&self, op: &QueuedOperation, report: &mut DrainReport) {
        match self.with_log(|log| log.mark_synced(&op.id)).await {
            Ok(_) => {
                debug!("Synced {} {} {}", op.kind, op.collection, op.id);
                report.synced += 1;
                self.events.send(SyncEvent::OperationSynced { id: op.id.clone() });
            }
            // The remote already has the change; the next pass will replay it.
            Err(e) => error!("Failed to mark {} as synced: {}", op.id, e),
        }
    }

    async fn handle_failure(&self, op: &QueuedOperation, err: Error, report: &mut DrainReport) {
        let message = err.to_string();

        if !is_retryable(&err) {
            warn!(
                "{} {} {} rejected permanently: {}",
                op.kind, op.collection, op.id, message
            );
            self.dead_letter(op, &message, false, report).await;
            return;
        }

        let failures = op.attempts.saturating_add(1);
        if self.retry.is_exhausted(failures) {
            warn!(
                "{} {} {} failed {} time(s), giving up: {}",
                op.kind, op.collection, op.id, failures, message
            );
            self.dead_letter(op, &message, true, report).await;
            return;
        }

        let next_attempt_at = self.retry.next_attempt_at(failures, OffsetDateTime::now_utc());
        match self
            .with_log(|log| log.record_failure(&op.id, &message, Some(next_attempt_at)))
            .await
        {
            Ok(attempts) => {
                let attempts = attempts.unwrap_or(failures);
                warn!(
                    "{} {} {} failed (attempt {}/{}), retrying at {}: {}",
                    op.kind, op.collection, op.id, attempts, self.retry.max_attempts, next_attempt_at, message
                );
                report.retried += 1;
                self.events.send(SyncEvent::OperationRetrying {
                    id: op.id.clone(),
                    attempts,
                    next_attempt_at,
                    error: message,
                });
            }
            Err(e) => error!("Failed to record failure for {}: {}", op.id, e),
        }
    }

    async fn dead_letter(
        &self,
        op: &QueuedOperation,
        message: &str,
        count_attempt: bool,
        report: &mut DrainReport,
    ) {
        let result = self
            .with_log(|log| {
                if count_attempt {
                    log.record_failure(&op.id, message, None)?;
                }
                log.mark_failed(&op.id, message)
            })
            .await;
        match result {
            Ok(_) => {
                report.dead_lettered += 1;
                self.events.send(SyncEvent::OperationFailed {
                    id: op.id.clone(),
                    error: message.to_string(),
                });
            }
            Err(e) => error!("Failed to dead-letter {}: {}", op.id, e),
        }
    }

    /// Run a log mutation and publish the resulting status under the same lock.
    ///
    /// Holding the lock across both keeps published snapshots in mutation order.
    pub async fn with_log<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> larder_store::Result<T>,
    {
        let log = self.log.lock().await;
        let out = f(&log)?;
        self.publish_locked(&log);
        Ok(out)
    }

    /// Recompute and publish the current status.
    pub async fn publish_status(&self) {
        let log = self.log.lock().await;
        self.publish_locked(&log);
    }

    fn publish_locked(&self, log: &Store) {
        match log.counts() {
            Ok(counts) => self.status.publish(SyncStatus {
                is_online: self.connectivity.is_online(),
                pending_operations: counts.pending,
                failed_operations: counts.failed,
                sync_in_progress: self.is_draining(),
                last_sync: self.last_sync(),
            }),
            Err(e) => warn!("Failed to compute sync status: {}", e),
        }
    }
}

/// Apply one queued operation to the remote.
async fn apply(remote: &dyn RemoteService, op: &QueuedOperation) -> Result<()> {
    match op.kind {
        OperationKind::Create => remote.create(&op.collection, &op.payload).await?,
        OperationKind::Update => remote.update(&op.collection, &op.payload).await?,
        OperationKind::Delete => {
            let id = op
                .record_id()
                .ok_or_else(|| RemoteError::validation("delete payload has no id"))?;
            remote.delete(&op.collection, &id).await?
        }
    }
    Ok(())
}
