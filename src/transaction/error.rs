//! Transaction error types.

use thiserror::Error;

use crate::engine::EngineError;
use crate::transaction::context::TxKind;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
///
/// Any of these aborts the transaction as a whole: none of its writes are
/// visible afterwards.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The engine refused to start a transaction.
    #[error("failed to begin {kind} transaction: {source}")]
    Begin {
        kind: TxKind,
        #[source]
        source: EngineError,
    },

    /// A lookup or scan failed.
    #[error("read failed in transaction {tx_id}: {source}")]
    Read {
        tx_id: String,
        #[source]
        source: EngineError,
    },

    /// A set or delete failed.
    #[error("write failed in transaction {tx_id}: {source}")]
    Write {
        tx_id: String,
        #[source]
        source: EngineError,
    },

    /// The commit was rejected.
    #[error("transaction {tx_id} failed to commit: {source}")]
    Commit {
        tx_id: String,
        #[source]
        source: EngineError,
    },

    /// The rollback itself failed.
    #[error("transaction {tx_id} failed to roll back: {source}")]
    Rollback {
        tx_id: String,
        #[source]
        source: EngineError,
    },

    /// The caller cancelled before the transaction started.
    #[error("cancelled before the transaction started")]
    Cancelled,
}

impl TransactionError {
    /// Check if retrying the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Write { source, .. } | TransactionError::Commit { source, .. } => {
                source.is_retriable()
            }
            _ => false,
        }
    }

    /// The engine error underneath, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            TransactionError::Begin { source, .. }
            | TransactionError::Read { source, .. }
            | TransactionError::Write { source, .. }
            | TransactionError::Commit { source, .. }
            | TransactionError::Rollback { source, .. } => Some(source),
            TransactionError::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let conflict = TransactionError::Commit {
            tx_id: "tx001".to_string(),
            source: EngineError::Conflict("key a".into()),
        };
        assert!(conflict.is_retryable());

        let io = TransactionError::Commit {
            tx_id: "tx001".to_string(),
            source: EngineError::Storage("disk full".into()),
        };
        assert!(!io.is_retryable());
        assert!(!TransactionError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = TransactionError::Begin {
            kind: TxKind::Write,
            source: EngineError::Begin("closed".into()),
        };
        assert_eq!(
            err.to_string(),
            "failed to begin write transaction: failed to begin transaction: closed"
        );
        assert!(err.engine_error().is_some());
    }
}
