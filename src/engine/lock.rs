//! Exclusive store directory lock.
//!
//! Each open engine holds an OS-level lock on `<store>/LOCK`. The lock is
//! released when the [`DirLock`] is dropped, and by the OS if the process
//! dies.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, error};

use super::{EngineError, EngineResult};

/// Name of the lock file inside the store directory.
pub const LOCK_FILE: &str = "LOCK";

/// An exclusive lock on a store directory.
#[derive(Debug)]
pub struct DirLock {
    // kept open: closing the file drops the lock
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock on `dir`, creating the directory first when
    /// `create_if_missing` is set.
    ///
    /// Never blocks: a lock held elsewhere yields [`EngineError::LockHeld`].
    pub fn acquire(dir: &Path, create_if_missing: bool) -> EngineResult<Self> {
        if !dir.exists() {
            if !create_if_missing {
                return Err(EngineError::invalid_path(dir, "directory does not exist"));
            }
            fs::create_dir_all(dir)?;
            debug!(path = %dir.display(), "created store directory");
        } else if !dir.is_dir() {
            return Err(EngineError::invalid_path(dir, "not a directory"));
        }

        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired store lock");
                Ok(Self { file, path })
            }
            Err(e) if is_contended(&e) => Err(EngineError::LockHeld(dir.to_path_buf())),
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The locked store directory.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            error!(path = %self.path.display(), error = %e, "failed to release store lock");
        } else {
            debug!(path = %self.path.display(), "released store lock");
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    // EWOULDBLOCK is 11 on Linux and 35 on macOS
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == Some(11)
        || err.raw_os_error() == Some(35)
}
