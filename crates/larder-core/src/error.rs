//! Error types for larder-core.
//!
//! This module defines the errors produced while draining the operation log
//! against the remote service and while running the import workflow.
//!
//! # Error Recovery Strategies
//!
//! Remote failures are classified by [`RemoteErrorKind`]. The sync
//! coordinator uses the classification to decide what happens to a queued
//! operation that could not be applied:
//!
//! | Error | Queue outcome | Rationale |
//! |-------|---------------|-----------|
//! | [`RemoteErrorKind::Transient`] | Stays pending, retried with backoff | Network or server hiccup |
//! | [`Error::Timeout`] | Stays pending, retried with backoff | Remote call exceeded the call timeout |
//! | [`RemoteErrorKind::Validation`] | Dead-lettered | Payload rejected, retrying cannot succeed |
//! | [`RemoteErrorKind::Conflict`] | Dead-lettered | Target row missing or changed |
//! | [`Error::Cancelled`] | Stays pending, untouched | Shutdown requested mid-call |
//!
//! Dead-lettered operations remain visible through
//! [`SyncEngine::failed_operations`](crate::SyncEngine::failed_operations)
//! and can be re-queued with
//! [`SyncEngine::retry_failed`](crate::SyncEngine::retry_failed).
//!
//! Import failures surface the error of the step that failed. Compensation
//! failures are logged and reported as [`CompensationFailure`] values but
//! never replace the original error.

use std::time::Duration;

use thiserror::Error;

/// Classification of a failure reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// Network failure, timeout, rate limiting, or a server-side 5xx.
    Transient,
    /// The request was rejected as malformed.
    Validation,
    /// The target record is missing or was changed concurrently.
    Conflict,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteErrorKind::Transient => write!(f, "transient"),
            RemoteErrorKind::Validation => write!(f, "validation"),
            RemoteErrorKind::Conflict => write!(f, "conflict"),
        }
    }
}

/// A failure reported by a [`RemoteService`](crate::RemoteService) or
/// [`ImportBackend`](crate::ImportBackend).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct RemoteError {
    /// How the failure should be treated.
    pub kind: RemoteErrorKind,
    /// Human-readable description.
    pub message: String,
    /// HTTP status code, when the failure came from an HTTP response.
    pub status: Option<u16>,
}

impl RemoteError {
    /// Create an error of the given kind.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// A retryable failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    /// A payload rejected by the remote.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Validation, message)
    }

    /// A missing or concurrently modified target.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }

    /// Classify an HTTP error status.
    ///
    /// 400 and 422 are validation failures; 404, 409 and 412 are conflicts;
    /// everything else (408, 429, 5xx, unknown) is treated as transient.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            400 | 422 => RemoteErrorKind::Validation,
            404 | 409 | 412 => RemoteErrorKind::Conflict,
            _ => RemoteErrorKind::Transient,
        };
        Self {
            kind,
            message: message.into(),
            status: Some(status),
        }
    }

    /// Returns `true` if retrying cannot make this call succeed.
    pub fn is_permanent(&self) -> bool {
        self.kind != RemoteErrorKind::Transient
    }
}

/// A compensating action that could not undo its step.
///
/// The entity it names must be cleaned up by hand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("compensation '{label}' failed: {message}")]
pub struct CompensationFailure {
    /// Which step could not be undone, e.g. `delete store 42`.
    pub label: String,
    /// The last error returned by the compensating action.
    pub message: String,
}

/// Errors produced by the sync engine and import workflow.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The remote service rejected or failed a call.
    #[error("Remote service error: {0}")]
    Remote(#[from] RemoteError),

    /// A remote call exceeded its deadline.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The call that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Work was abandoned because shutdown was requested.
    #[error("Operation cancelled")]
    Cancelled,

    /// The local operation log failed.
    #[error("Storage error: {0}")]
    Store(#[from] larder_store::Error),

    /// An import batch failed validation before any remote call.
    #[error("Invalid import batch: {0}")]
    InvalidBatch(String),

    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON encoding failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using larder-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create an invalid batch error.
    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self::InvalidBatch(message.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// The remote classification, if this error came from the remote.
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            Error::Remote(e) => Some(e.kind),
            Error::Timeout { .. } => Some(RemoteErrorKind::Transient),
            _ => None,
        }
    }
}
