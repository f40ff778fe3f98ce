//! Transaction manager - coordinates all transaction operations.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Transaction creation and lifecycle
//! - Tracking active transactions
//! - Commit on success, rollback on failure or panic

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{ReadTxn, StorageEngine, WriteTxn};
use crate::transaction::cancel::CancelToken;
use crate::transaction::context::{
    Transaction, TransactionMetadata, TxAborted, TxActive, TxCommitted, TxKind,
};
use crate::transaction::error::{TransactionError, TransactionResult};

/// Read transaction type of engine `E`.
pub type ReadTransaction<'e, E> = Transaction<<E as StorageEngine>::ReadTxn<'e>, TxActive>;

/// Write transaction type of engine `E`.
pub type WriteTransaction<'e, E> = Transaction<<E as StorageEngine>::WriteTxn<'e>, TxActive>;

/// Transaction manager - coordinates all transaction operations.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone, Default)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

#[derive(Default)]
struct TransactionManagerInner {
    /// Active transactions tracked by ID.
    active: RwLock<HashMap<String, TransactionMetadata>>,
}

/// Removes a transaction from the active set on every exit path.
struct Completion<'m> {
    manager: &'m TransactionManager,
    tx_id: String,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.manager.mark_completed(&self.tx_id);
    }
}

impl TransactionManager {
    /// Create a new transaction manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id() -> String {
        Ulid::new().to_string().to_lowercase()
    }

    fn track<T>(&self, tx: &Transaction<T, TxActive>) {
        let mut active = self.inner.active.write();
        active.insert(tx.id().to_string(), tx.metadata.clone());
    }

    /// Begin a snapshot read transaction.
    pub fn begin_read<'e, E: StorageEngine>(
        &self,
        engine: &'e E,
    ) -> TransactionResult<ReadTransaction<'e, E>> {
        let txn = engine
            .begin_read()
            .map_err(|source| TransactionError::Begin {
                kind: TxKind::Read,
                source,
            })?;
        let tx = Transaction::new(Self::next_id(), TxKind::Read, txn);
        self.track(&tx);
        debug!(tx_id = tx.id(), kind = %TxKind::Read, "transaction started");
        Ok(tx)
    }

    /// Begin a write transaction. Blocks while another writer is active.
    pub fn begin_write<'e, E: StorageEngine>(
        &self,
        engine: &'e E,
    ) -> TransactionResult<WriteTransaction<'e, E>> {
        let txn = engine
            .begin_write()
            .map_err(|source| TransactionError::Begin {
                kind: TxKind::Write,
                source,
            })?;
        let tx = Transaction::new(Self::next_id(), TxKind::Write, txn);
        self.track(&tx);
        debug!(tx_id = tx.id(), kind = %TxKind::Write, "transaction started");
        Ok(tx)
    }

    /// Get the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all active transactions.
    pub fn active_transactions(&self) -> Vec<TransactionMetadata> {
        self.inner.active.read().values().cloned().collect()
    }

    /// Check if a transaction is active.
    pub fn is_active(&self, tx_id: &str) -> bool {
        self.inner.active.read().contains_key(tx_id)
    }

    /// Mark a transaction as completed (committed, released or aborted).
    pub(crate) fn mark_completed(&self, tx_id: &str) {
        self.inner.active.write().remove(tx_id);
    }

    /// Commit a write transaction.
    pub fn commit_transaction<T: WriteTxn>(
        &self,
        tx: Transaction<T, TxActive>,
    ) -> TransactionResult<Transaction<(), TxCommitted>> {
        let _completion = Completion {
            manager: self,
            tx_id: tx.id().to_string(),
        };
        let committed = tx.commit()?;
        debug!(tx_id = committed.id(), "transaction committed");
        Ok(committed)
    }

    /// Rollback a write transaction.
    pub fn rollback_transaction<T: WriteTxn>(
        &self,
        tx: Transaction<T, TxActive>,
    ) -> TransactionResult<Transaction<(), TxAborted>> {
        let _completion = Completion {
            manager: self,
            tx_id: tx.id().to_string(),
        };
        let aborted = tx.rollback()?;
        debug!(tx_id = aborted.id(), "transaction rolled back");
        Ok(aborted)
    }

    /// Release a read transaction.
    pub fn release_transaction<T: ReadTxn>(
        &self,
        tx: Transaction<T, TxActive>,
    ) -> Transaction<(), TxCommitted> {
        self.mark_completed(tx.id());
        tx.release()
    }

    /// Execute a function within a read transaction.
    ///
    /// The cancellation token, if any, is checked once before the
    /// transaction begins.
    pub fn with_read<'e, E, F, T, Error>(
        &self,
        engine: &'e E,
        cancel: Option<&CancelToken>,
        f: F,
    ) -> Result<T, Error>
    where
        E: StorageEngine,
        F: FnOnce(&ReadTransaction<'e, E>) -> Result<T, Error>,
        Error: From<TransactionError>,
    {
        if let Some(token) = cancel {
            token.check()?;
        }

        let tx = self.begin_read(engine)?;
        let _completion = Completion {
            manager: self,
            tx_id: tx.id().to_string(),
        };

        let result = f(&tx);
        let released = tx.release();
        debug!(tx_id = released.id(), ok = result.is_ok(), "transaction released");
        result
    }

    /// Execute a function within a write transaction, automatically
    /// committing or rolling back.
    ///
    /// If the function returns Ok, the transaction is committed.
    /// If the function returns Err or panics, the transaction is rolled back.
    pub fn with_write<'e, E, F, T, Error>(
        &self,
        engine: &'e E,
        cancel: Option<&CancelToken>,
        f: F,
    ) -> Result<T, Error>
    where
        E: StorageEngine,
        F: FnOnce(&mut WriteTransaction<'e, E>) -> Result<T, Error>,
        Error: From<TransactionError>,
    {
        if let Some(token) = cancel {
            token.check()?;
        }

        let mut tx = self.begin_write(engine)?;
        let _completion = Completion {
            manager: self,
            tx_id: tx.id().to_string(),
        };

        match f(&mut tx) {
            Ok(result) => {
                let committed = tx.commit()?;
                debug!(tx_id = committed.id(), "transaction committed");
                Ok(result)
            }
            Err(e) => {
                let tx_id = tx.id().to_string();
                match tx.rollback() {
                    Ok(_) => debug!(tx_id = %tx_id, "transaction rolled back"),
                    // the caller gets the error that caused the rollback
                    Err(rollback) => warn!(tx_id = %tx_id, error = %rollback, "rollback failed"),
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .finish()
    }
}
