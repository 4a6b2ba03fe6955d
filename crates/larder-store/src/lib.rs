//! Durable operation log and offline cache for Larder.
//!
//! This crate provides the SQLite-backed storage underneath the sync
//! engine. Every queued mutation is committed here before the caller gets
//! control back, so pending work survives process restarts.
//!
//! # Features
//!
//! - FIFO log of pending remote mutations (`pending_operations`)
//! - Idempotent sync acknowledgement and dead-lettering
//! - Per-operation retry bookkeeping (attempts, next attempt time)
//! - Snapshot cache for offline reads (`cached_data`)
//!
//! # Example
//!
//! ```no_run
//! use larder_store::Store;
//! use larder_types::OperationKind;
//! use serde_json::json;
//!
//! let store = Store::open_default()?;
//!
//! let id = store.enqueue(OperationKind::Create, "products", json!({"name": "Flour"}))?;
//! for op in store.list_pending()? {
//!     println!("{} {} {}", op.id, op.kind, op.collection);
//! }
//! store.mark_synced(&id)?;
//! # Ok::<(), larder_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::OperationCounts;
pub use queries::OperationQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/larder/queue.db`
/// - macOS: `~/Library/Application Support/larder/queue.db`
/// - Windows: `C:\Users\<user>\AppData\Local\larder\queue.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("larder")
        .join("queue.db")
}
