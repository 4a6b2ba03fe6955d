//! Error types for larder-store.

use std::path::PathBuf;

/// Result type for larder-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in larder-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Operation rejected before it reached the database.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Timestamp outside the representable range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Payload serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
