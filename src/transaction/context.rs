//! Transaction context using typestate pattern.
//!
//! The typestate pattern ensures at compile time that transactions
//! are used correctly:
//! - Only active transactions can read or write
//! - Committed/aborted transactions cannot be reused
//! - Nothing borrowed from the engine outlives the transaction

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};

use crate::engine::{ReadTxn, WriteTxn};
use crate::transaction::error::{TransactionError, TransactionResult};

/// Marker type for active transactions.
#[derive(Debug)]
pub struct TxActive;

/// Marker type for committed (or, for reads, released) transactions.
#[derive(Debug)]
pub struct TxCommitted;

/// Marker type for rolled-back transactions.
#[derive(Debug)]
pub struct TxAborted;

/// Whether a transaction only reads or may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// Snapshot read view. Many may coexist.
    Read,
    /// Write update. At most one is active at a time.
    Write,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::Read => write!(f, "read"),
            TxKind::Write => write!(f, "write"),
        }
    }
}

/// Transaction metadata tracked by the manager.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    /// Unique transaction ID.
    pub tx_id: String,
    /// Read or write.
    pub kind: TxKind,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
}

/// A transaction with typestate for lifecycle safety.
///
/// `T` is the engine transaction; after commit or rollback it becomes `()`.
pub struct Transaction<T, State> {
    pub(crate) metadata: TransactionMetadata,
    txn: T,
    _state: PhantomData<State>,
}

impl<T, State> Transaction<T, State> {
    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.metadata.tx_id
    }

    /// Read or write.
    pub fn kind(&self) -> TxKind {
        self.metadata.kind
    }

    /// When the transaction started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.metadata.started_at
    }

    /// Get the transaction metadata.
    pub fn metadata(&self) -> &TransactionMetadata {
        &self.metadata
    }

    fn finish<Next>(self) -> Transaction<(), Next> {
        Transaction {
            metadata: self.metadata,
            txn: (),
            _state: PhantomData,
        }
    }
}

impl<T> Transaction<T, TxActive> {
    pub(crate) fn new(tx_id: String, kind: TxKind, txn: T) -> Self {
        Self {
            metadata: TransactionMetadata {
                tx_id,
                kind,
                started_at: Utc::now(),
            },
            txn,
            _state: PhantomData,
        }
    }

    fn read_error(&self, source: crate::engine::EngineError) -> TransactionError {
        TransactionError::Read {
            tx_id: self.metadata.tx_id.clone(),
            source,
        }
    }
}

impl<T: ReadTxn> Transaction<T, TxActive> {
    // ==================== Read Operations ====================

    /// Look up a key. The value is an owned copy.
    pub fn get(&self, key: &[u8]) -> TransactionResult<Option<Vec<u8>>> {
        self.txn.get(key).map_err(|e| self.read_error(e))
    }

    /// Check if a key exists.
    pub fn contains(&self, key: &[u8]) -> TransactionResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Visit every pair in ascending key order.
    ///
    /// The slices are only valid inside the callback.
    pub fn for_each(&self, mut visit: impl FnMut(&[u8], &[u8])) -> TransactionResult<()> {
        self.txn
            .for_each(&mut |key, value| {
                visit(key, value);
                Ok(())
            })
            .map_err(|e| self.read_error(e))
    }

    /// Copy every pair out of the transaction.
    pub fn dump(&self) -> TransactionResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut records = BTreeMap::new();
        self.for_each(|key, value| {
            records.insert(key.to_vec(), value.to_vec());
        })?;
        Ok(records)
    }

    /// Count the pairs visible to this transaction.
    pub fn len(&self) -> TransactionResult<u64> {
        self.txn.len().map_err(|e| self.read_error(e))
    }

    /// Check if no pairs are visible.
    pub fn is_empty(&self) -> TransactionResult<bool> {
        Ok(self.len()? == 0)
    }

    /// End a read transaction, releasing its snapshot.
    pub fn release(self) -> Transaction<(), TxCommitted> {
        self.finish()
    }
}

impl<T: WriteTxn> Transaction<T, TxActive> {
    // ==================== Write Operations ====================

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> TransactionResult<()> {
        self.txn
            .set(key, value)
            .map_err(|source| TransactionError::Write {
                tx_id: self.metadata.tx_id.clone(),
                source,
            })
    }

    /// Delete a key, returning whether it existed.
    pub fn delete(&mut self, key: &[u8]) -> TransactionResult<bool> {
        self.txn.delete(key).map_err(|source| TransactionError::Write {
            tx_id: self.metadata.tx_id.clone(),
            source,
        })
    }

    // ==================== Transaction Control ====================

    /// Commit the transaction.
    ///
    /// On failure nothing from this transaction is visible.
    pub fn commit(self) -> TransactionResult<Transaction<(), TxCommitted>> {
        let Transaction { metadata, txn, .. } = self;
        match txn.commit() {
            Ok(()) => Ok(Transaction {
                metadata,
                txn: (),
                _state: PhantomData,
            }),
            Err(source) => Err(TransactionError::Commit {
                tx_id: metadata.tx_id,
                source,
            }),
        }
    }

    /// Rollback the transaction, discarding all writes.
    pub fn rollback(self) -> TransactionResult<Transaction<(), TxAborted>> {
        let Transaction { metadata, txn, .. } = self;
        match txn.rollback() {
            Ok(()) => Ok(Transaction {
                metadata,
                txn: (),
                _state: PhantomData,
            }),
            Err(source) => Err(TransactionError::Rollback {
                tx_id: metadata.tx_id,
                source,
            }),
        }
    }
}

impl Transaction<(), TxCommitted> {
    /// How long the transaction was open.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.metadata.started_at
    }
}

impl Transaction<(), TxAborted> {
    /// Always true: the transaction's writes were discarded.
    pub fn was_rolled_back(&self) -> bool {
        true
    }
}
