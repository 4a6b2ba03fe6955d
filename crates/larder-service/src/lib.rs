//! HTTP and WebSocket front end for the Larder sync engine.
//!
//! This crate hosts a [`SyncEngine`](larder_core::SyncEngine) and exposes it
//! to the dashboard:
//! - Queues mutations in the local operation log
//! - Drains the log against the configured backend when online
//! - Runs onboarding imports with rollback on failure
//! - Streams status snapshots and sync events over WebSocket
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Current sync status
//! - `POST /api/operations` - Queue an operation
//! - `GET /api/operations` - List operations (`status`, `collection`, `limit`, `offset`)
//! - `GET /api/operations/{id}` - Get one operation
//! - `POST /api/operations/{id}/retry` - Requeue a failed operation
//! - `POST /api/operations/retry-failed` - Requeue every failed operation
//! - `POST /api/sync` - Force a drain pass
//! - `PUT /api/connectivity` - Report connectivity (`{"online": bool}`)
//! - `POST /api/imports` - Run an import batch
//! - `GET|PUT /api/cache/{key}` - Offline read cache
//! - `WS /api/ws` - Status and event stream
//!
//! # Configuration
//!
//! The service reads configuration from `<config_dir>/larder/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/larder/queue.db"
//!
//! [remote]
//! base_url = "https://backend.example.com"
//! api_key = "service-key"
//!
//! [sync]
//! max_attempts = 8
//! retry_interval_secs = 30
//! ```

pub mod api;
pub mod config;
pub mod remote;
pub mod state;
pub mod ws;

pub use config::{
    Config, ConfigError, RemoteConfig, ServerConfig, StorageConfig, SyncConfig, ValidationError,
};
pub use state::AppState;
