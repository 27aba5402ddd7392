use thiserror::Error;

use kabu_shared::KabuError;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation expected a document that does not exist.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Document (de)serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Optimistic concurrency retries exhausted.
    #[error("Transaction conflict: retries exhausted")]
    Conflict,

    /// A transaction tried to read after buffering a write.
    #[error("Transaction reads must happen before writes")]
    ReadAfterWrite,

    /// A merge update was applied to a non-object document body.
    #[error("Document body is not a JSON object")]
    NotAnObject,

    /// The connection mutex was poisoned by a panicking holder.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for KabuError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => KabuError::NotFound("record not found".to_string()),
            StoreError::Conflict => KabuError::TransactionConflict,
            other => KabuError::Storage(other.to_string()),
        }
    }
}
