//! Core engine traits.
//!
//! A [`Backend`] knows how to open an engine on a store directory. The
//! resulting [`StorageEngine`] hands out snapshot-isolated read transactions
//! and single-writer write transactions.

use std::path::Path;

use super::EngineResult;

/// Opens storage engines on a store directory.
///
/// Backends are cheap to keep around: the per-operation lifecycle calls
/// [`Backend::open`] once per operation.
pub trait Backend: Send + Sync {
    /// The engine type produced by this backend.
    type Engine: StorageEngine;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Open the engine on `path`, taking the exclusive lock on the directory.
    ///
    /// Must fail fast with [`EngineError::LockHeld`](super::EngineError::LockHeld)
    /// when another holder owns the lock; it never blocks waiting for it.
    fn open(&self, path: &Path, mode: OpenMode) -> EngineResult<Self::Engine>;
}

/// What to do when the store directory does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Create the directory and an empty store.
    #[default]
    CreateIfMissing,
    /// Fail with an invalid path error.
    MustExist,
}

impl OpenMode {
    /// Whether a missing directory should be created.
    pub fn creates(self) -> bool {
        matches!(self, OpenMode::CreateIfMissing)
    }
}

/// An open engine handle.
pub trait StorageEngine: Send + Sync {
    /// Read-only snapshot transaction.
    type ReadTxn<'a>: ReadTxn
    where
        Self: 'a;

    /// Read-write transaction.
    type WriteTxn<'a>: WriteTxn
    where
        Self: 'a;

    /// Begin a read-only transaction over a consistent snapshot.
    fn begin_read(&self) -> EngineResult<Self::ReadTxn<'_>>;

    /// Begin a read-write transaction. Blocks while another writer is active.
    fn begin_write(&self) -> EngineResult<Self::WriteTxn<'_>>;

    /// Flush and release the handle, including the directory lock.
    fn close(self) -> EngineResult<()>
    where
        Self: Sized;
}

/// Read operations available in every transaction.
///
/// Data borrowed from a transaction never outlives it: `get` returns an
/// owned copy and `for_each` lends each pair only for the duration of the
/// callback.
pub trait ReadTxn {
    /// Look up `key`, copying the value out of the transaction.
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Walk every pair in ascending key order.
    ///
    /// The visitor may stop the walk early by returning an error.
    fn for_each(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> EngineResult<()>)
        -> EngineResult<()>;

    /// Count the pairs visible to this transaction.
    fn len(&self) -> EngineResult<u64> {
        let mut count = 0;
        self.for_each(&mut |_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }
}

/// A read-write transaction. Dropping it without committing rolls it back.
pub trait WriteTxn: ReadTxn {
    /// Insert or overwrite `key`.
    fn set(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    /// Remove `key`, returning whether it existed.
    fn delete(&mut self, key: &[u8]) -> EngineResult<bool>;

    /// Make every write of this transaction durable and visible atomically.
    fn commit(self) -> EngineResult<()>;

    /// Discard every write of this transaction.
    fn rollback(self) -> EngineResult<()>;
}
