//! In-process storage backend.
//!
//! Keeps every record in a shared ordered map. Readers get an immutable
//! snapshot of the map taken when their transaction begins; the single
//! writer stages its changes on a private copy that replaces the shared map
//! on commit. Opening is exclusive, like a directory lock, and faults can be
//! injected to exercise abort paths.
//!
//! All engines opened from one [`MemoryBackend`] (or its clones) see the
//! same data, so records survive close and reopen for the backend's
//! lifetime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use super::traits::{Backend, OpenMode, ReadTxn, StorageEngine, WriteTxn};
use super::{EngineError, EngineResult};

type Records = BTreeMap<Vec<u8>, Vec<u8>>;

/// Faults applied to write transactions begun while they are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Fail every write after this many writes succeeded in one transaction.
    pub fail_write_after: Option<usize>,
    /// Fail every commit.
    pub fail_commit: bool,
    /// Fail every engine close. The lock is still released.
    pub fail_close: bool,
}

#[derive(Default)]
struct Shared {
    records: RwLock<Arc<Records>>,
    writer: Mutex<()>,
    locked: AtomicBool,
    opens: AtomicUsize,
    faults: Mutex<Faults>,
}

/// Opens [`MemoryEngine`]s over one shared record set.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes fail once `count` writes succeeded in a transaction.
    pub fn fail_write_after(&self, count: usize) {
        self.shared.faults.lock().fail_write_after = Some(count);
    }

    /// Make commits fail.
    pub fn fail_commits(&self, fail: bool) {
        self.shared.faults.lock().fail_commit = fail;
    }

    /// Make engine closes report an error.
    pub fn fail_closes(&self, fail: bool) {
        self.shared.faults.lock().fail_close = fail;
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        *self.shared.faults.lock() = Faults::default();
    }

    /// Currently injected faults.
    pub fn faults(&self) -> Faults {
        *self.shared.faults.lock()
    }

    /// Whether an engine is currently open.
    pub fn is_locked(&self) -> bool {
        self.shared.locked.load(Ordering::Acquire)
    }

    /// How many times an engine was opened.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("locked", &self.is_locked())
            .field("opens", &self.open_count())
            .field("records", &self.shared.records.read().len())
            .finish()
    }
}

impl Backend for MemoryBackend {
    type Engine = MemoryEngine;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, path: &Path, _mode: OpenMode) -> EngineResult<MemoryEngine> {
        if self.shared.locked.swap(true, Ordering::AcqRel) {
            return Err(EngineError::LockHeld(path.to_path_buf()));
        }
        self.shared.opens.fetch_add(1, Ordering::AcqRel);
        debug!(path = %path.display(), "memory engine opened");
        Ok(MemoryEngine {
            shared: Arc::clone(&self.shared),
            path: path.to_path_buf(),
        })
    }
}

/// An open in-process engine. Dropping it releases the exclusive lock.
pub struct MemoryEngine {
    shared: Arc<Shared>,
    path: PathBuf,
}

impl StorageEngine for MemoryEngine {
    type ReadTxn<'a> = MemoryReadTxn;
    type WriteTxn<'a> = MemoryWriteTxn<'a>;

    fn begin_read(&self) -> EngineResult<MemoryReadTxn> {
        Ok(MemoryReadTxn {
            snapshot: self.shared.records.read().clone(),
        })
    }

    fn begin_write(&self) -> EngineResult<MemoryWriteTxn<'_>> {
        let writer = self.shared.writer.lock();
        let staged = (**self.shared.records.read()).clone();
        Ok(MemoryWriteTxn {
            _writer: writer,
            shared: &self.shared,
            staged,
            writes: 0,
            faults: *self.shared.faults.lock(),
        })
    }

    fn close(self) -> EngineResult<()> {
        let fail = self.shared.faults.lock().fail_close;
        let path = self.path.clone();
        drop(self);
        if fail {
            return Err(EngineError::Injected(format!("close of {} rejected", path.display())));
        }
        Ok(())
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        self.shared.locked.store(false, Ordering::Release);
        debug!(path = %self.path.display(), "memory engine closed");
    }
}

/// Snapshot read transaction.
pub struct MemoryReadTxn {
    snapshot: Arc<Records>,
}

impl ReadTxn for MemoryReadTxn {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key).cloned())
    }

    fn for_each(
        &self,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> EngineResult<()>,
    ) -> EngineResult<()> {
        for (key, value) in self.snapshot.iter() {
            visit(key, value)?;
        }
        Ok(())
    }

    fn len(&self) -> EngineResult<u64> {
        Ok(self.snapshot.len() as u64)
    }
}

/// Write transaction holding the single-writer lock.
pub struct MemoryWriteTxn<'a> {
    _writer: MutexGuard<'a, ()>,
    shared: &'a Shared,
    staged: Records,
    writes: usize,
    faults: Faults,
}

impl MemoryWriteTxn<'_> {
    fn check_write_fault(&self) -> EngineResult<()> {
        match self.faults.fail_write_after {
            Some(limit) if self.writes >= limit => Err(EngineError::Injected(format!(
                "write {} rejected",
                self.writes + 1
            ))),
            _ => Ok(()),
        }
    }
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.staged.get(key).cloned())
    }

    fn for_each(
        &self,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> EngineResult<()>,
    ) -> EngineResult<()> {
        for (key, value) in self.staged.iter() {
            visit(key, value)?;
        }
        Ok(())
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn set(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.check_write_fault()?;
        self.staged.insert(key.to_vec(), value.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<bool> {
        self.check_write_fault()?;
        self.writes += 1;
        Ok(self.staged.remove(key).is_some())
    }

    fn commit(self) -> EngineResult<()> {
        if self.faults.fail_commit {
            return Err(EngineError::Injected("commit rejected".into()));
        }
        *self.shared.records.write() = Arc::new(self.staged);
        Ok(())
    }

    fn rollback(self) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(backend: &MemoryBackend) -> MemoryEngine {
        backend.open(Path::new("mem"), OpenMode::default()).unwrap()
    }

    #[test]
    fn test_write_and_read() {
        let backend = MemoryBackend::new();
        let engine = open(&backend);

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"k", b"v").unwrap();
        tx.commit().unwrap();

        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_exclusive_open() {
        let backend = MemoryBackend::new();
        let engine = open(&backend);
        assert!(backend.is_locked());

        let second = backend.open(Path::new("mem"), OpenMode::default());
        assert!(matches!(second, Err(EngineError::LockHeld(_))));

        engine.close().unwrap();
        assert!(!backend.is_locked());
        assert!(backend.open(Path::new("mem"), OpenMode::default()).is_ok());
        assert_eq!(backend.open_count(), 2);
    }

    #[test]
    fn test_data_survives_reopen() {
        let backend = MemoryBackend::new();
        {
            let engine = open(&backend);
            let mut tx = engine.begin_write().unwrap();
            tx.set(b"k", b"v").unwrap();
            tx.commit().unwrap();
        }

        let engine = open(&backend);
        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_write_fault_rejects_after_limit() {
        let backend = MemoryBackend::new();
        backend.fail_write_after(1);
        let engine = open(&backend);

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"a", b"1").unwrap();
        assert!(matches!(tx.set(b"b", b"2"), Err(EngineError::Injected(_))));
        tx.rollback().unwrap();

        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.len().unwrap(), 0);
    }

    #[test]
    fn test_commit_fault_discards_writes() {
        let backend = MemoryBackend::new();
        backend.fail_commits(true);
        let engine = open(&backend);

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"a", b"1").unwrap();
        assert!(tx.commit().is_err());

        backend.clear_faults();
        assert_eq!(backend.faults(), Faults::default());
        let tx = engine.begin_read().unwrap();
        assert_eq!(tx.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_snapshot_isolation() {
        let backend = MemoryBackend::new();
        let engine = open(&backend);
        let snapshot = engine.begin_read().unwrap();

        let mut tx = engine.begin_write().unwrap();
        tx.set(b"late", b"1").unwrap();
        tx.commit().unwrap();

        assert_eq!(snapshot.get(b"late").unwrap(), None);
        assert_eq!(engine.begin_read().unwrap().len().unwrap(), 1);
    }
}
