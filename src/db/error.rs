//! Caller-facing error taxonomy.
//!
//! Failures from the engine and transaction layers are folded into
//! [`StoreError`]; [`StoreError::kind`] classifies them so callers can branch
//! on "missing" versus "failed" without matching every variant.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::api::format_bytes;
use crate::engine::EngineError;
use crate::transaction::TransactionError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Broad classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The engine could not be opened or closed.
    Connection,
    /// An operation ran while the store was closed.
    NotConnected,
    /// The key is absent.
    NotFound,
    /// A transaction was aborted.
    Transaction,
    /// Reserved for duplicate-key detection.
    Duplicate,
    /// Cancelled before the transaction started.
    Cancelled,
    /// The configuration is unusable.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::NotFound => "not found",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine failed to open or close (lock held, disk error, bad path).
    #[error("connection error for store {path}: {source}")]
    Connection {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    /// Open was requested while the store is already open.
    #[error("store already connected: {0}")]
    AlreadyConnected(PathBuf),

    /// The store is closed.
    #[error("store not connected")]
    NotConnected,

    /// The key does not exist.
    #[error("key not found: {}", format_bytes(.key))]
    NotFound { key: Vec<u8> },

    /// A transaction failed and was rolled back.
    #[error("transaction error: {0}")]
    Transaction(#[source] TransactionError),

    /// Duplicate entry. No built-in operation raises this; `set` is an upsert.
    #[error("duplicate entry: {}", format_bytes(.key))]
    Duplicate { key: Vec<u8> },

    /// A cancellation token fired before the transaction started.
    #[error("operation cancelled before the transaction started")]
    Cancelled,

    /// The configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connection { .. } | StoreError::AlreadyConnected(_) => {
                ErrorKind::Connection
            }
            StoreError::NotConnected => ErrorKind::NotConnected,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Transaction(_) => ErrorKind::Transaction,
            StoreError::Duplicate { .. } => ErrorKind::Duplicate,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::InvalidConfig(_) => ErrorKind::Config,
        }
    }

    /// Check if this error means the key is absent.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if the store is held by another holder.
    pub fn is_lock_held(&self) -> bool {
        matches!(self, StoreError::Connection { source, .. } if source.is_lock_held())
    }

    /// Check if retrying the operation may succeed. Nothing retries internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transaction(e) if e.is_retryable())
    }

    pub(crate) fn connection(path: impl Into<PathBuf>, source: EngineError) -> Self {
        StoreError::Connection {
            path: path.into(),
            source,
        }
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Cancelled => StoreError::Cancelled,
            other => StoreError::Transaction(other),
        }
    }
}
