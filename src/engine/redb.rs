//! Redb storage backend.
//!
//! The store directory holds the exclusive `LOCK` file and a single redb
//! database file, `data.redb`. Records live in one table keyed by raw bytes,
//! so iteration order is byte-lexicographic.
//!
//! Redb gives snapshot isolation to readers and admits a single writer at a
//! time; `begin_write` blocks until the previous writer finishes.

use std::path::{Path, PathBuf};

use redb::{
    Database, ReadTransaction, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use tracing::debug;

use super::lock::DirLock;
use super::traits::{Backend, OpenMode, ReadTxn, StorageEngine, WriteTxn};
use super::{EngineError, EngineResult};

/// The physical table holding every record.
const DATA_TABLE: TableDefinition<'static, &[u8], &[u8]> = TableDefinition::new("kvdb_data");

/// Name of the data file inside the store directory.
pub const DATA_FILE: &str = "data.redb";

/// Opens [`RedbEngine`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedbBackend {
    /// Page cache size in bytes. Redb's default when unset.
    pub cache_size: Option<usize>,
}

impl RedbBackend {
    /// Create a backend with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache size.
    #[must_use]
    pub const fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = Some(bytes);
        self
    }
}

impl Backend for RedbBackend {
    type Engine = RedbEngine;

    fn name(&self) -> &'static str {
        "redb"
    }

    fn open(&self, path: &Path, mode: OpenMode) -> EngineResult<RedbEngine> {
        let lock = DirLock::acquire(path, mode.creates())?;

        let mut builder = Database::builder();
        if let Some(cache_size) = self.cache_size {
            builder.set_cache_size(cache_size);
        }

        let db = match builder.create(path.join(DATA_FILE)) {
            Ok(db) => db,
            Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                return Err(EngineError::LockHeld(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "redb engine opened");
        Ok(RedbEngine {
            db,
            _lock: lock,
            path: path.to_path_buf(),
        })
    }
}

/// An open redb database plus the lock on its directory.
pub struct RedbEngine {
    // dropped before the lock
    db: Database,
    _lock: DirLock,
    path: PathBuf,
}

impl RedbEngine {
    /// The store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageEngine for RedbEngine {
    type ReadTxn<'a> = RedbReadTxn;
    type WriteTxn<'a> = RedbWriteTxn;

    fn begin_read(&self) -> EngineResult<RedbReadTxn> {
        Ok(RedbReadTxn {
            tx: self.db.begin_read()?,
        })
    }

    fn begin_write(&self) -> EngineResult<RedbWriteTxn> {
        Ok(RedbWriteTxn {
            tx: self.db.begin_write()?,
        })
    }

    fn close(self) -> EngineResult<()> {
        let RedbEngine { db, _lock, path } = self;
        // every commit is already durable; dropping the database closes the file
        drop(db);
        drop(_lock);
        debug!(path = %path.display(), "redb engine closed");
        Ok(())
    }
}

/// Snapshot read transaction.
pub struct RedbReadTxn {
    tx: ReadTransaction,
}

impl ReadTxn for RedbReadTxn {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let table = match self.tx.open_table(DATA_TABLE) {
            Ok(table) => table,
            // nothing was ever written
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn for_each(
        &self,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> EngineResult<()>,
    ) -> EngineResult<()> {
        let table = match self.tx.open_table(DATA_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in table.iter()? {
            let (key, value) = entry?;
            visit(key.value(), value.value())?;
        }
        Ok(())
    }

    fn len(&self) -> EngineResult<u64> {
        match self.tx.open_table(DATA_TABLE) {
            Ok(table) => Ok(table.len()?),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read-write transaction. Redb aborts it when dropped uncommitted.
pub struct RedbWriteTxn {
    tx: WriteTransaction,
}

impl ReadTxn for RedbWriteTxn {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let table = self.tx.open_table(DATA_TABLE)?;
        let value = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn for_each(
        &self,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> EngineResult<()>,
    ) -> EngineResult<()> {
        let table = self.tx.open_table(DATA_TABLE)?;
        for entry in table.iter()? {
            let (key, value) = entry?;
            visit(key.value(), value.value())?;
        }
        Ok(())
    }
}

impl WriteTxn for RedbWriteTxn {
    fn set(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let mut table = self.tx.open_table(DATA_TABLE)?;
        table.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<bool> {
        let mut table = self.tx.open_table(DATA_TABLE)?;
        let existed = table.remove(key)?.is_some();
        Ok(existed)
    }

    fn commit(self) -> EngineResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self) -> EngineResult<()> {
        self.tx.abort()?;
        debug!("redb write transaction aborted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RedbEngine {
        RedbBackend::new()
            .open(dir.path(), OpenMode::CreateIfMissing)
            .expect("failed to open redb engine")
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"key", b"value").unwrap();
        tx.commit().unwrap();

        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get(b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(tx.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_read_before_any_write() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get(b"a").unwrap(), None);
        assert_eq!(tx.len().unwrap(), 0);
    }

    #[test]
    fn test_iteration_is_ordered() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"b", b"2").unwrap();
        tx.set(b"a", b"1").unwrap();
        tx.set(b"c", b"3").unwrap();
        tx.commit().unwrap();

        let tx = engine.begin_read().unwrap();
        let mut keys = Vec::new();
        tx.for_each(&mut |k, _| {
            keys.push(k.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(tx.len().unwrap(), 3);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"key", b"value").unwrap();
        tx.rollback().unwrap();

        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get(b"key").unwrap(), None);
    }

    #[test]
    fn test_delete_reports_existence() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"key", b"value").unwrap();
        assert!(tx.delete(b"key").unwrap());
        assert!(!tx.delete(b"key").unwrap());
        tx.commit().unwrap();
    }

    #[test]
    fn test_snapshot_ignores_later_commits() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir);

        let snapshot = engine.begin_read().unwrap();

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"late", b"1").unwrap();
        tx.commit().unwrap();

        assert_eq!(snapshot.get(b"late").unwrap(), None);
    }

    #[test]
    fn test_second_open_is_rejected() {
        let dir = TempDir::new().unwrap();
        let _engine = open(&dir);

        let second = RedbBackend::new().open(dir.path(), OpenMode::CreateIfMissing);
        assert!(matches!(second, Err(EngineError::LockHeld(_))));
    }

    #[test]
    fn test_reopen_after_close_keeps_data() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open(&dir);
            let mut tx = engine.begin_write().unwrap();
            tx.set(b"durable", b"yes").unwrap();
            tx.commit().unwrap();
            engine.close().unwrap();
        }

        let engine = open(&dir);
        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get(b"durable").unwrap(), Some(b"yes".to_vec()));
        assert!(dir.path().join(DATA_FILE).exists());
    }
}
