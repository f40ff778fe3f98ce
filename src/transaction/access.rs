//! Object-safe views of an active transaction.
//!
//! Closures passed to `Store::with_read` and `Store::with_write` receive a
//! `&dyn ReadAccess` or `&mut dyn WriteAccess`, which keeps the engine's
//! transaction types out of the public signatures.

use std::collections::BTreeMap;

use crate::engine::{ReadTxn, WriteTxn};
use crate::transaction::context::{Transaction, TxActive};
use crate::transaction::error::TransactionResult;

/// Reads available inside any active transaction.
pub trait ReadAccess {
    /// Look up a key. The value is an owned copy.
    fn get(&self, key: &[u8]) -> TransactionResult<Option<Vec<u8>>>;

    /// Check if a key exists.
    fn contains(&self, key: &[u8]) -> TransactionResult<bool>;

    /// Copy every pair out, in ascending key order.
    fn dump(&self) -> TransactionResult<BTreeMap<Vec<u8>, Vec<u8>>>;

    /// Count the visible pairs.
    fn len(&self) -> TransactionResult<u64>;

    /// Check if no pairs are visible.
    fn is_empty(&self) -> TransactionResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Transaction ID, for logging.
    fn tx_id(&self) -> &str;
}

/// Writes available inside an active write transaction.
pub trait WriteAccess: ReadAccess {
    /// Insert or overwrite a key.
    fn set(&mut self, key: &[u8], value: &[u8]) -> TransactionResult<()>;

    /// Delete a key, returning whether it existed.
    fn delete(&mut self, key: &[u8]) -> TransactionResult<bool>;
}

impl<T: ReadTxn> ReadAccess for Transaction<T, TxActive> {
    fn get(&self, key: &[u8]) -> TransactionResult<Option<Vec<u8>>> {
        Transaction::get(self, key)
    }

    fn contains(&self, key: &[u8]) -> TransactionResult<bool> {
        Transaction::contains(self, key)
    }

    fn dump(&self) -> TransactionResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        Transaction::dump(self)
    }

    fn len(&self) -> TransactionResult<u64> {
        Transaction::len(self)
    }

    fn tx_id(&self) -> &str {
        self.id()
    }
}

impl<T: WriteTxn> WriteAccess for Transaction<T, TxActive> {
    fn set(&mut self, key: &[u8], value: &[u8]) -> TransactionResult<()> {
        Transaction::set(self, key, value)
    }

    fn delete(&mut self, key: &[u8]) -> TransactionResult<bool> {
        Transaction::delete(self, key)
    }
}
