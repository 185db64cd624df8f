//! Cross-process mutual exclusion for reconciliation cycles.
//!
//! Every process that runs a cycle (the background poller, query-layer
//! requests, one-shot invocations) takes an exclusive advisory lock on a
//! dedicated lock file first. The lock belongs to the open file handle, so
//! it is released when the guard is dropped, on every exit path, and by the
//! OS if the holder dies.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::error_handling::types::LockError;

#[derive(Debug, Clone)]
pub struct CycleLock {
    path: PathBuf,
}

/// Held for the duration of one cycle.
#[derive(Debug)]
pub struct CycleLockGuard {
    file: File,
    path: PathBuf,
}

impl CycleLock {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until the lock is held.
    pub fn acquire(&self) -> Result<CycleLockGuard, LockError> {
        let file = self.open()?;
        sys::lock_exclusive(&file).map_err(|e| LockError::AcquireFailed(self.path.clone(), e))?;
        debug!("Acquired cycle lock {}", self.path.display());
        Ok(CycleLockGuard {
            file,
            path: self.path.clone(),
        })
    }

    /// Takes the lock only if nobody holds it.
    pub fn try_acquire(&self) -> Result<Option<CycleLockGuard>, LockError> {
        let file = self.open()?;
        match sys::try_lock_exclusive(&file) {
            Ok(true) => {
                debug!("Acquired cycle lock {}", self.path.display());
                Ok(Some(CycleLockGuard {
                    file,
                    path: self.path.clone(),
                }))
            }
            Ok(false) => Ok(None),
            Err(e) => Err(LockError::AcquireFailed(self.path.clone(), e)),
        }
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LockError::OpenFailed(self.path.clone(), e))?;
            }
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| LockError::OpenFailed(self.path.clone(), e))
    }
}

impl Drop for CycleLockGuard {
    fn drop(&mut self) {
        // Closing the handle releases the lock too; unlocking first just
        // lets a waiter in without waiting for the close.
        let _ = sys::unlock(&self.file);
        trace!("Released cycle lock {}", self.path.display());
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
    }

    pub fn lock_exclusive(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_EX)
    }

    pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
        match flock(file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        flock(file, libc::LOCK_UN)
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "advisory file locks require a unix platform")
    }

    pub fn lock_exclusive(_file: &File) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
        Err(unsupported())
    }

    pub fn unlock(_file: &File) -> io::Result<()> {
        Ok(())
    }
}
