//! Error types for the store crate.

use thiserror::Error;

/// Storage error type covering every failure a backend can report.
#[derive(Debug, Error)]
pub enum StoreError {
    // Cursor errors
    /// `next` was called on a cursor that was never opened or already closed.
    #[error("range cursor is not open")]
    CursorNotOpen,

    // Content log errors
    /// A read addressed bytes outside the blob it was given.
    #[error("blob read out of range: offset {offset} + {len} exceeds blob length {blob_length}")]
    BlobOutOfRange {
        /// Requested offset inside the blob.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Length recorded in the blob reference.
        blob_length: u64,
    },

    /// A block referenced by a blob is missing from the content log.
    #[error("content block {0} is missing")]
    MissingBlock(u64),

    // Encoding errors
    /// Failed to encode a node value.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Failed to decode a node value.
    #[error("decoding failed: {0}")]
    Decode(String),

    /// Stat record (de)serialization failed.
    #[error("stat record encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    // Backend errors
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The backing connection lock was poisoned by a panicking holder.
    #[error("lock poisoned: {context}")]
    LockPoisoned { context: String },
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        StoreError::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}
