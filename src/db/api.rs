//! Store API - high-level interface for kvdb.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::config::{Lifecycle, StoreConfig};
use super::connection::{ConnectionManager, ConnectionState};
use super::error::{StoreError, StoreResult};
use crate::engine::{Backend, EngineError, RedbBackend};
use crate::transaction::{
    CancelToken, ReadAccess, TransactionManager, TransactionMetadata, WriteAccess,
};

/// Render a key or value for humans: UTF-8 as is, anything else as hex.
pub fn format_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("0x{}", hex)
        }
    }
}

/// A transactional key-value store on one directory.
///
/// Every operation runs in exactly one engine transaction. Values are copied
/// out before the transaction ends, so nothing returned borrows from the
/// engine.
///
/// The store is `Sync`: share it between threads with an `Arc`.
pub struct Store<B: Backend = RedbBackend> {
    config: StoreConfig,
    connection: ConnectionManager<B>,
    tx_manager: TransactionManager,
}

impl Store<RedbBackend> {
    /// Open or create a store with the given configuration.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let backend = match config.cache_size {
            Some(bytes) => RedbBackend::new().cache_size(bytes),
            None => RedbBackend::new(),
        };
        Self::open_with_backend(backend, config)
    }

    /// Open or create a store at `path` with default options.
    pub fn open_path(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open(StoreConfig::new(path.as_ref()))
    }
}

impl<B: Backend> Store<B> {
    /// Open a store on a specific backend.
    ///
    /// An unusable path, including an empty one, is a connection error.
    pub fn open_with_backend(backend: B, config: StoreConfig) -> StoreResult<Self> {
        if config.path.as_os_str().is_empty() {
            return Err(StoreError::connection(
                &config.path,
                EngineError::invalid_path(&config.path, "path must not be empty"),
            ));
        }
        let connection = ConnectionManager::new(backend, &config);
        connection.connect()?;

        Ok(Self {
            config,
            connection,
            tx_manager: TransactionManager::new(),
        })
    }

    // ==================== Lifecycle ====================

    /// Re-open a disconnected store.
    pub fn connect(&self) -> StoreResult<()> {
        self.connection.connect()
    }

    /// Close the engine but keep the store value around. Operations fail
    /// with [`StoreError::NotConnected`] until [`Store::connect`] is called.
    pub fn disconnect(&self) -> StoreResult<()> {
        self.connection.disconnect()
    }

    /// Close the store, reporting any failure to release the engine.
    pub fn close(self) -> StoreResult<()> {
        self.connection.disconnect()
    }

    /// Get the connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Check if the store accepts operations.
    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the lifecycle strategy.
    pub fn lifecycle(&self) -> Lifecycle {
        self.config.lifecycle
    }

    /// View of this store whose operations honor `token`.
    ///
    /// The token is checked before each transaction begins. A transaction
    /// that already started runs to completion.
    pub fn cancellable<'s>(&'s self, token: &'s CancelToken) -> Cancellable<'s, B> {
        Cancellable { store: self, token }
    }

    // ==================== Operations ====================

    /// Insert or overwrite a key.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreResult<()> {
        self.set_with(None, key.as_ref(), value.as_ref())
    }

    /// Write all pairs in one transaction: either every pair is stored or
    /// none is.
    pub fn multi_set<I, K, V>(&self, pairs: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.multi_set_with(None, pairs)
    }

    /// Get the value of a key, or [`StoreError::NotFound`].
    pub fn get(&self, key: impl AsRef<[u8]>) -> StoreResult<Vec<u8>> {
        self.get_with(None, key.as_ref())
    }

    /// Delete a key. Deleting an absent key is not an error.
    pub fn del(&self, key: impl AsRef<[u8]>) -> StoreResult<()> {
        self.del_with(None, key.as_ref())
    }

    /// Copy every pair out of one snapshot, in ascending key order.
    pub fn dump(&self) -> StoreResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        self.dump_with(None)
    }

    /// Check if a key exists.
    pub fn contains(&self, key: impl AsRef<[u8]>) -> StoreResult<bool> {
        let key = key.as_ref();
        self.read(None, |tx| Ok(tx.contains(key)?))
    }

    /// Count the stored pairs.
    pub fn len(&self) -> StoreResult<u64> {
        self.read(None, |tx| Ok(tx.len()?))
    }

    /// Check if the store holds no pairs.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Run `f` inside one read transaction.
    ///
    /// `f` must not call back into this store under the per-operation
    /// lifecycle; the access guard is not reentrant.
    pub fn with_read<T>(
        &self,
        f: impl FnOnce(&dyn ReadAccess) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.read(None, f)
    }

    /// Run `f` inside one write transaction, committing if it returns `Ok`
    /// and rolling back if it returns `Err` or panics.
    ///
    /// `f` must not start another write on this store: the engine admits one
    /// writer at a time.
    pub fn with_write<T>(
        &self,
        f: impl FnOnce(&mut dyn WriteAccess) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.write(None, f)
    }

    // ==================== Introspection ====================

    /// Get store statistics.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let records = self.len()?;
        Ok(StoreStats {
            path: self.config.path.clone(),
            backend: self.connection.backend().name(),
            lifecycle: self.config.lifecycle,
            state: self.state(),
            records,
            active_transactions: self.tx_manager.active_count(),
        })
    }

    /// List the transactions currently in flight.
    pub fn active_transactions(&self) -> Vec<TransactionMetadata> {
        self.tx_manager.active_transactions()
    }

    // ==================== Internals ====================

    fn read<T>(
        &self,
        cancel: Option<&CancelToken>,
        f: impl FnOnce(&dyn ReadAccess) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.connection.with_engine(cancel, |engine| {
            self.tx_manager.with_read(engine, cancel, |tx| f(tx))
        })
    }

    fn write<T>(
        &self,
        cancel: Option<&CancelToken>,
        f: impl FnOnce(&mut dyn WriteAccess) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.connection.with_engine(cancel, |engine| {
            self.tx_manager.with_write(engine, cancel, |tx| f(tx))
        })
    }

    fn set_with(&self, cancel: Option<&CancelToken>, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.write(cancel, |tx| Ok(tx.set(key, value)?))
    }

    fn multi_set_with<I, K, V>(&self, cancel: Option<&CancelToken>, pairs: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.write(cancel, |tx| {
            let mut count = 0usize;
            for (key, value) in pairs {
                tx.set(key.as_ref(), value.as_ref())?;
                count += 1;
            }
            debug!(tx_id = tx.tx_id(), count, "multi_set staged");
            Ok(())
        })
    }

    fn get_with(&self, cancel: Option<&CancelToken>, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.read(cancel, |tx| {
            tx.get(key)?
                .ok_or_else(|| StoreError::NotFound { key: key.to_vec() })
        })
    }

    fn del_with(&self, cancel: Option<&CancelToken>, key: &[u8]) -> StoreResult<()> {
        self.write(cancel, |tx| {
            let existed = tx.delete(key)?;
            debug!(tx_id = tx.tx_id(), existed, "key deleted");
            Ok(())
        })
    }

    fn dump_with(&self, cancel: Option<&CancelToken>) -> StoreResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        self.read(cancel, |tx| Ok(tx.dump()?))
    }
}

impl<B: Backend> fmt::Debug for Store<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("tx_manager", &self.tx_manager)
            .finish()
    }
}

/// Store operations that check a [`CancelToken`] before starting.
///
/// Created by [`Store::cancellable`].
pub struct Cancellable<'s, B: Backend> {
    store: &'s Store<B>,
    token: &'s CancelToken,
}

impl<B: Backend> Cancellable<'_, B> {
    /// Insert or overwrite a key.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreResult<()> {
        self.store
            .set_with(Some(self.token), key.as_ref(), value.as_ref())
    }

    /// Write all pairs in one transaction.
    pub fn multi_set<I, K, V>(&self, pairs: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.store.multi_set_with(Some(self.token), pairs)
    }

    /// Get the value of a key.
    pub fn get(&self, key: impl AsRef<[u8]>) -> StoreResult<Vec<u8>> {
        self.store.get_with(Some(self.token), key.as_ref())
    }

    /// Delete a key.
    pub fn del(&self, key: impl AsRef<[u8]>) -> StoreResult<()> {
        self.store.del_with(Some(self.token), key.as_ref())
    }

    /// Copy every pair out of one snapshot.
    pub fn dump(&self) -> StoreResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        self.store.dump_with(Some(self.token))
    }

    /// Run `f` inside one read transaction.
    pub fn with_read<T>(
        &self,
        f: impl FnOnce(&dyn ReadAccess) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.store.read(Some(self.token), f)
    }

    /// Run `f` inside one write transaction, committing on `Ok`.
    pub fn with_write<T>(
        &self,
        f: impl FnOnce(&mut dyn WriteAccess) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.store.write(Some(self.token), f)
    }
}

/// Store statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Store directory.
    pub path: PathBuf,
    /// Backend name.
    pub backend: &'static str,
    /// Lifecycle strategy.
    pub lifecycle: Lifecycle,
    /// Connection state.
    pub state: ConnectionState,
    /// Number of stored pairs.
    pub records: u64,
    /// Transactions in flight, not counting the one that gathered these stats.
    pub active_transactions: usize,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "path:                {}", self.path.display())?;
        writeln!(f, "backend:             {}", self.backend)?;
        writeln!(f, "lifecycle:           {}", self.lifecycle)?;
        writeln!(f, "state:               {}", self.state)?;
        writeln!(f, "records:             {}", self.records)?;
        write!(f, "active transactions: {}", self.active_transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryBackend;

    fn memory_store(lifecycle: Lifecycle) -> (MemoryBackend, Store<MemoryBackend>) {
        let backend = MemoryBackend::new();
        let config = StoreConfig::new("mem").lifecycle(lifecycle);
        let store = Store::open_with_backend(backend.clone(), config).unwrap();
        (backend, store)
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(b"hello"), "hello");
        assert_eq!(format_bytes(&[0xde, 0xad]), "0xdead");
        assert_eq!(format_bytes(b""), "");
    }

    #[test]
    fn test_set_get_del() {
        let (_backend, store) = memory_store(Lifecycle::Persistent);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap(), b"1".to_vec());
        assert!(store.contains("a").unwrap());

        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap(), b"2".to_vec());

        store.del("a").unwrap();
        assert!(store.get("a").unwrap_err().is_not_found());
        // absent key
        store.del("a").unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_empty_value_is_not_absence() {
        let (_backend, store) = memory_store(Lifecycle::Persistent);
        store.set("k", "").unwrap();
        assert_eq!(store.get("k").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_multi_set_all_or_nothing() {
        let (backend, store) = memory_store(Lifecycle::Persistent);
        store.set("x", "0").unwrap();
        backend.fail_write_after(2);

        let err = store
            .multi_set([("a", "1"), ("b", "2"), ("c", "3")])
            .unwrap_err();
        assert!(matches!(err, StoreError::Transaction(_)));

        backend.clear_faults();
        let records = store.dump().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[&b"x".to_vec()], b"0".to_vec());
    }

    #[test]
    fn test_multi_set_failed_commit() {
        let (backend, store) = memory_store(Lifecycle::Persistent);
        backend.fail_commits(true);

        assert!(store.multi_set([("a", "1"), ("b", "2")]).is_err());
        backend.clear_faults();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_with_write_rolls_back_on_error() {
        let (_backend, store) = memory_store(Lifecycle::Persistent);

        let result: StoreResult<()> = store.with_write(|tx| {
            tx.set(b"a", b"1")?;
            Err(StoreError::Duplicate { key: b"a".to_vec() })
        });
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
        assert!(store.is_empty().unwrap());

        let value = store
            .with_write(|tx| {
                tx.set(b"a", b"1")?;
                Ok(tx.get(b"a")?)
            })
            .unwrap();
        assert_eq!(value, Some(b"1".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_with_read_sees_one_snapshot() {
        let (_backend, store) = memory_store(Lifecycle::Persistent);
        store.multi_set([("a", "1"), ("b", "2")]).unwrap();

        let (len, dump) = store
            .with_read(|tx| Ok((tx.len()?, tx.dump()?)))
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(dump.len(), 2);
    }

    #[test]
    fn test_not_connected_after_disconnect() {
        for lifecycle in [Lifecycle::Persistent, Lifecycle::PerOperation] {
            let (_backend, store) = memory_store(lifecycle);
            store.set("a", "1").unwrap();
            store.disconnect().unwrap();

            assert!(matches!(store.get("a"), Err(StoreError::NotConnected)));
            assert!(matches!(store.set("b", "2"), Err(StoreError::NotConnected)));

            store.connect().unwrap();
            assert_eq!(store.get("a").unwrap(), b"1".to_vec());
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        for lifecycle in [Lifecycle::Persistent, Lifecycle::PerOperation] {
            let (_backend, store) = memory_store(lifecycle);
            let token = CancelToken::new();
            let view = store.cancellable(&token);

            view.set("a", "1").unwrap();
            token.cancel();

            assert!(matches!(view.set("b", "2"), Err(StoreError::Cancelled)));
            assert!(matches!(view.get("a"), Err(StoreError::Cancelled)));
            assert_eq!(store.len().unwrap(), 1);
        }
    }

    #[test]
    fn test_cancellable_closures() {
        let (_backend, store) = memory_store(Lifecycle::Persistent);
        let token = CancelToken::new();
        let view = store.cancellable(&token);

        view.with_write(|tx| Ok(tx.set(b"a", b"1")?)).unwrap();
        assert_eq!(view.with_read(|tx| Ok(tx.len()?)).unwrap(), 1);

        token.cancel();
        let result = view.with_write(|tx| Ok(tx.set(b"b", b"2")?));
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert!(matches!(view.with_read(|tx| Ok(tx.len()?)), Err(StoreError::Cancelled)));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_per_operation_reopens_each_time() {
        let (backend, store) = memory_store(Lifecycle::PerOperation);
        let before = backend.open_count();

        store.set("a", "1").unwrap();
        store.get("a").unwrap();
        store.dump().unwrap();

        assert_eq!(backend.open_count(), before + 3);
        assert!(!backend.is_locked());
    }

    #[test]
    fn test_stats() {
        let (_backend, store) = memory_store(Lifecycle::Persistent);
        store.multi_set([("a", "1"), ("b", "2")]).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.state, ConnectionState::Open);
        assert_eq!(stats.active_transactions, 0);
        assert!(stats.to_string().contains("records:             2"));
        assert!(store.active_transactions().is_empty());
    }

    #[test]
    fn test_close_releases_lock() {
        let (backend, store) = memory_store(Lifecycle::Persistent);
        assert!(backend.is_locked());
        store.close().unwrap();
        assert!(!backend.is_locked());
    }

    #[test]
    fn test_empty_path_is_connection_error() {
        let backend = MemoryBackend::new();
        let err = Store::open_with_backend(backend.clone(), StoreConfig::new("")).unwrap_err();
        assert_eq!(err.kind(), crate::db::ErrorKind::Connection);
        assert!(matches!(
            err,
            StoreError::Connection {
                source: EngineError::InvalidPath { .. },
                ..
            }
        ));
        assert_eq!(backend.open_count(), 0);
    }
}
