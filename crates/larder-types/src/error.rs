//! Error types for value parsing in larder-types.

use thiserror::Error;

/// Errors that can occur when parsing stored or wire representations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Unknown operation kind.
    #[error("Unknown operation kind: {0}")]
    UnknownKind(String),

    /// Unknown operation status.
    #[error("Unknown operation status: {0}")]
    UnknownStatus(String),
}

/// Result type alias using larder-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
