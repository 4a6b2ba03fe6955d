//! Application state shared across handlers.
//!
//! Handlers reach the queue, status and import workflow through the
//! [`SyncEngine`]; it serializes access to the operation log itself, so no
//! extra locking lives here.

use std::sync::Arc;

use time::OffsetDateTime;

use larder_core::SyncEngine;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The sync engine hosting the queue and import workflow.
    pub engine: SyncEngine,
    /// Configuration the service was started with.
    pub config: Config,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    pub fn new(engine: SyncEngine, config: Config) -> Arc<Self> {
        Arc::new(Self {
            engine,
            config,
            started_at: OffsetDateTime::now_utc(),
        })
    }
}
