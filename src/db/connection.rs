//! Engine connection lifecycle.
//!
//! [`ConnectionManager`] owns the backend, the store path and, while the
//! store is open under [`Lifecycle::Persistent`], the engine handle. Under
//! [`Lifecycle::PerOperation`] it opens and closes the engine around each
//! operation while holding an access guard that serializes all operations.
//!
//! State machine: `Closed -> Opening -> Open -> Closing -> Closed`.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::config::{Lifecycle, StoreConfig};
use super::error::{StoreError, StoreResult};
use crate::engine::{Backend, OpenMode, StorageEngine};
use crate::transaction::CancelToken;

/// Connection state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle; operations fail with not connected.
    Closed,
    /// The engine is being opened.
    Opening,
    /// Accepting operations.
    Open,
    /// The engine is being closed.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// An engine opened for a single operation. Closed on every exit path.
struct Session<E: StorageEngine> {
    engine: Option<E>,
}

impl<E: StorageEngine> Session<E> {
    fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    fn close(mut self) -> crate::engine::EngineResult<()> {
        match self.engine.take() {
            Some(engine) => engine.close(),
            None => Ok(()),
        }
    }
}

impl<E: StorageEngine> Drop for Session<E> {
    fn drop(&mut self) {
        // only reached with an engine when the operation panicked
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.close() {
                warn!(error = %e, "failed to close engine while unwinding");
            }
        }
    }
}

/// Owns the engine handle and governs when it is opened and closed.
pub struct ConnectionManager<B: Backend> {
    backend: B,
    path: PathBuf,
    lifecycle: Lifecycle,
    mode: OpenMode,
    state: Mutex<ConnectionState>,
    /// Engine handle, present iff open under the persistent lifecycle.
    handle: RwLock<Option<B::Engine>>,
    /// Serializes every operation under the per-operation lifecycle.
    access_guard: Mutex<()>,
}

impl<B: Backend> ConnectionManager<B> {
    /// Create a closed connection manager.
    pub fn new(backend: B, config: &StoreConfig) -> Self {
        Self {
            backend,
            path: config.path.clone(),
            lifecycle: config.lifecycle,
            mode: config.open_mode(),
            state: Mutex::new(ConnectionState::Closed),
            handle: RwLock::new(None),
            access_guard: Mutex::new(()),
        }
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the lifecycle strategy.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Get the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get the current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Check if the store accepts operations.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn open_engine(&self) -> StoreResult<B::Engine> {
        self.backend
            .open(&self.path, self.mode)
            .map_err(|e| StoreError::connection(&self.path, e))
    }

    /// Open the store.
    ///
    /// Opening an open store is an error. Under the per-operation lifecycle
    /// the engine is opened and closed once here so that a bad path or a
    /// held lock is reported now rather than on the first operation.
    pub fn connect(&self) -> StoreResult<()> {
        let mut handle = self.handle.write();
        let _guard = self.access_guard.lock();

        if self.state() != ConnectionState::Closed {
            return Err(StoreError::AlreadyConnected(self.path.clone()));
        }
        self.set_state(ConnectionState::Opening);

        let opened = self.open_engine().and_then(|engine| match self.lifecycle {
            Lifecycle::Persistent => {
                *handle = Some(engine);
                Ok(())
            }
            Lifecycle::PerOperation => engine
                .close()
                .map_err(|e| StoreError::connection(&self.path, e)),
        });

        match opened {
            Ok(()) => {
                self.set_state(ConnectionState::Open);
                info!(
                    path = %self.path.display(),
                    backend = self.backend.name(),
                    lifecycle = %self.lifecycle,
                    "store opened"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    /// Close the store, waiting for in-flight operations to finish.
    ///
    /// Closing a closed store does nothing.
    pub fn disconnect(&self) -> StoreResult<()> {
        let mut handle = self.handle.write();
        let _guard = self.access_guard.lock();

        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.set_state(ConnectionState::Closing);

        let closed = match handle.take() {
            Some(engine) => engine
                .close()
                .map_err(|e| StoreError::connection(&self.path, e)),
            None => Ok(()),
        };

        // the handle is gone either way
        self.set_state(ConnectionState::Closed);
        info!(path = %self.path.display(), ok = closed.is_ok(), "store closed");
        closed
    }

    /// Run `f` against an open engine.
    ///
    /// Persistent: shares the long-lived handle with other operations.
    /// Per-operation: takes the access guard, opens the engine, runs `f`,
    /// closes the engine and releases the guard, on every exit path. The
    /// cancellation token is checked after the guard is acquired, before the
    /// engine is opened.
    pub fn with_engine<T>(
        &self,
        cancel: Option<&CancelToken>,
        f: impl FnOnce(&B::Engine) -> StoreResult<T>,
    ) -> StoreResult<T> {
        match self.lifecycle {
            Lifecycle::Persistent => {
                // recursive so nested operations from caller closures cannot
                // deadlock behind a waiting disconnect
                let handle = self.handle.read_recursive();
                match handle.as_ref() {
                    Some(engine) => f(engine),
                    None => Err(StoreError::NotConnected),
                }
            }
            Lifecycle::PerOperation => {
                let _guard = self.access_guard.lock();
                if !self.is_open() {
                    return Err(StoreError::NotConnected);
                }
                if let Some(token) = cancel {
                    token.check()?;
                }

                let session = Session {
                    engine: Some(self.open_engine()?),
                };
                debug!(path = %self.path.display(), "engine opened for operation");

                let result = match session.engine() {
                    Some(engine) => f(engine),
                    None => Err(StoreError::NotConnected),
                };
                let closed = session
                    .close()
                    .map_err(|e| StoreError::connection(&self.path, e));

                match (result, closed) {
                    (Ok(value), Ok(())) => Ok(value),
                    (Ok(_), Err(e)) => Err(e),
                    (Err(e), Ok(())) => Err(e),
                    (Err(e), Err(close)) => {
                        // the operation's error wins; the close failure is still reported
                        warn!(path = %self.path.display(), error = %close, "failed to close engine after failed operation");
                        Err(e)
                    }
                }
            }
        }
    }
}

impl<B: Backend> Drop for ConnectionManager<B> {
    fn drop(&mut self) {
        if let Some(engine) = self.handle.get_mut().take() {
            match engine.close() {
                Ok(()) => info!(path = %self.path.display(), "store closed on drop"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "failed to close store on drop"),
            }
        }
        *self.state.get_mut() = ConnectionState::Closed;
    }
}

impl<B: Backend> fmt::Debug for ConnectionManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("path", &self.path)
            .field("backend", &self.backend.name())
            .field("lifecycle", &self.lifecycle)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryBackend, ReadTxn};

    fn manager(backend: &MemoryBackend, lifecycle: Lifecycle) -> ConnectionManager<MemoryBackend> {
        let config = StoreConfig::new("mem").lifecycle(lifecycle);
        ConnectionManager::new(backend.clone(), &config)
    }

    #[test]
    fn test_persistent_state_machine() {
        let backend = MemoryBackend::new();
        let conn = manager(&backend, Lifecycle::Persistent);
        assert_eq!(conn.state(), ConnectionState::Closed);

        conn.connect().unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(backend.is_locked());

        conn.disconnect().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!backend.is_locked());
    }

    #[test]
    fn test_connect_twice_is_error() {
        let backend = MemoryBackend::new();
        let conn = manager(&backend, Lifecycle::Persistent);
        conn.connect().unwrap();

        assert!(matches!(conn.connect(), Err(StoreError::AlreadyConnected(_))));
        assert!(conn.is_open());
    }

    #[test]
    fn test_disconnect_when_closed_is_noop() {
        let backend = MemoryBackend::new();
        let conn = manager(&backend, Lifecycle::Persistent);
        assert!(conn.disconnect().is_ok());
    }

    #[test]
    fn test_not_connected() {
        for lifecycle in [Lifecycle::Persistent, Lifecycle::PerOperation] {
            let backend = MemoryBackend::new();
            let conn = manager(&backend, lifecycle);
            let result = conn.with_engine(None, |_| Ok(()));
            assert!(matches!(result, Err(StoreError::NotConnected)));
        }
    }

    #[test]
    fn test_lock_held_is_connection_error() {
        let backend = MemoryBackend::new();
        let first = manager(&backend, Lifecycle::Persistent);
        first.connect().unwrap();

        let second = manager(&backend, Lifecycle::Persistent);
        let err = second.connect().unwrap_err();
        assert!(err.is_lock_held());
        assert_eq!(second.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_per_operation_opens_and_closes() {
        let backend = MemoryBackend::new();
        let conn = manager(&backend, Lifecycle::PerOperation);
        conn.connect().unwrap();
        // connect probes once and releases the lock
        assert_eq!(backend.open_count(), 1);
        assert!(!backend.is_locked());

        let len = conn
            .with_engine(None, |engine| {
                assert!(backend.is_locked());
                Ok(engine.begin_read().unwrap().len().unwrap())
            })
            .unwrap();
        assert_eq!(len, 0);
        assert_eq!(backend.open_count(), 2);
        assert!(!backend.is_locked());
    }

    #[test]
    fn test_per_operation_releases_on_error() {
        let backend = MemoryBackend::new();
        let conn = manager(&backend, Lifecycle::PerOperation);
        conn.connect().unwrap();

        let result: StoreResult<()> = conn.with_engine(None, |_| Err(StoreError::NotFound {
            key: b"k".to_vec(),
        }));
        assert!(result.unwrap_err().is_not_found());
        assert!(!backend.is_locked());
    }

    #[test]
    fn test_per_operation_releases_on_panic() {
        let backend = MemoryBackend::new();
        let conn = manager(&backend, Lifecycle::PerOperation);
        conn.connect().unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: StoreResult<()> = conn.with_engine(None, |_| panic!("boom"));
        }));
        assert!(outcome.is_err());
        assert!(!backend.is_locked());

        // the guard was released too
        assert!(conn.with_engine(None, |_| Ok(())).is_ok());
    }

    #[test]
    fn test_per_operation_cancelled_before_open() {
        let backend = MemoryBackend::new();
        let conn = manager(&backend, Lifecycle::PerOperation);
        conn.connect().unwrap();
        let token = CancelToken::new();
        token.cancel();

        let result = conn.with_engine(Some(&token), |_| Ok(()));
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn test_per_operation_close_failure() {
        let backend = MemoryBackend::new();
        let conn = manager(&backend, Lifecycle::PerOperation);
        conn.connect().unwrap();
        backend.fail_closes(true);

        // a successful operation surfaces the close failure
        let err = conn.with_engine(None, |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), crate::db::ErrorKind::Connection);
        assert!(!backend.is_locked());

        // a failed operation keeps its own error
        let err = conn
            .with_engine(None, |_| -> StoreResult<()> {
                Err(StoreError::NotFound { key: b"k".to_vec() })
            })
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!backend.is_locked());

        backend.clear_faults();
        assert!(conn.with_engine(None, |_| Ok(())).is_ok());
    }

    #[test]
    fn test_drop_releases_lock() {
        let backend = MemoryBackend::new();
        {
            let conn = manager(&backend, Lifecycle::Persistent);
            conn.connect().unwrap();
            assert!(backend.is_locked());
        }
        assert!(!backend.is_locked());
    }
}
