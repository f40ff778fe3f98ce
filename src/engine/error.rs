//! Engine layer error types
//!
//! Every failure reported by a storage backend is mapped into [`EngineError`].
//! The upper layers classify these into caller-facing kinds.

use std::path::PathBuf;

use thiserror::Error;

/// the main error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// another holder owns the exclusive lock on the store directory
    #[error("store is locked by another holder: {0}")]
    LockHeld(PathBuf),

    /// the store path cannot be used (not a directory, missing, ...)
    #[error("invalid store path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// the engine refused to open its data files
    #[error("failed to open engine: {0}")]
    Open(String),

    /// a transaction could not be started
    #[error("failed to begin transaction: {0}")]
    Begin(String),

    /// a read or write inside a transaction failed
    #[error("engine storage error: {0}")]
    Storage(String),

    /// the commit was rejected; nothing from the transaction is visible
    #[error("commit failed: {0}")]
    Commit(String),

    /// concurrent writers touched the same data
    #[error("write conflict: {0}")]
    Conflict(String),

    /// a fault injected through the memory backend
    #[error("injected fault: {0}")]
    Injected(String),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// check if this error means the store is held by someone else
    pub fn is_lock_held(&self) -> bool {
        matches!(self, EngineError::LockHeld(_))
    }

    /// check if this error is recoverable by retrying the whole transaction
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    pub(crate) fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EngineError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<redb::DatabaseError> for EngineError {
    fn from(err: redb::DatabaseError) -> Self {
        match err {
            redb::DatabaseError::Storage(redb::StorageError::Io(e)) => EngineError::Io(e),
            other => EngineError::Open(other.to_string()),
        }
    }
}

impl From<redb::TransactionError> for EngineError {
    fn from(err: redb::TransactionError) -> Self {
        EngineError::Begin(err.to_string())
    }
}

impl From<redb::TableError> for EngineError {
    fn from(err: redb::TableError) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for EngineError {
    fn from(err: redb::StorageError) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for EngineError {
    fn from(err: redb::CommitError) -> Self {
        EngineError::Commit(err.to_string())
    }
}

/// result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
