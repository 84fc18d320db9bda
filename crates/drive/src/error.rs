//! Error types for drive operations.

use store::StoreError;
use thiserror::Error;

/// Errors that can occur during drive operations.
///
/// Path-carrying variants hold the normalized path.
#[derive(Debug, Error)]
pub enum DriveError {
    /// The path is neither a file nor a non-empty or recorded directory.
    #[error("path does not exist: {0}")]
    NotFound(String),

    /// The operation would collide with an existing file or directory.
    #[error("path already exists: {0}")]
    AlreadyExists(String),

    /// A copy or move source is not an existing file.
    #[error("source file does not exist: {0}")]
    SourceNotFound(String),

    /// A directory operation named a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Non-recursive removal of a directory that still has entries.
    #[error("directory is not empty: {0}")]
    NotEmpty(String),

    /// The path cannot be normalized.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Namespace, content log or stat store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for drive operations.
pub type DriveResult<T> = Result<T, DriveError>;

impl DriveError {
    /// Whether this error reports a missing path or source.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveError::NotFound(_) | DriveError::SourceNotFound(_))
    }
}
