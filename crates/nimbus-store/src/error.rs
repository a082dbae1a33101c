//! Store error types.

use std::io;
use thiserror::Error;

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Document or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Revision mismatch or id already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed request (missing id, oversized bulk, bad hash).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Store unreachable or busy; the request may succeed later.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Document (de)serialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Create a NotFound error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a Conflict error.
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    /// Create a BadRequest error.
    pub fn bad_request(what: impl Into<String>) -> Self {
        Self::BadRequest(what.into())
    }

    /// True for failures worth one retry.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl From<StoreError> for io::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            StoreError::Conflict(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            StoreError::BadRequest(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            StoreError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;
