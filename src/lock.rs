//! Operation lock
//!
//! Kill switch operations are multi-command sequences; two of them
//! interleaving would leave the chains in an order neither intended. The
//! CLI holds an exclusive `flock(2)` on a lock file for the duration of an
//! operation. The lock is advisory and released when the guard is dropped
//! or the process exits.

use crate::core::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for as long as the current operation runs
#[derive(Debug)]
pub struct OperationLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl OperationLock {
    /// Takes the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] if another process holds the lock, or
    /// [`Error::Io`] if the lock file cannot be opened.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o600)
            .open(path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!("Acquired operation lock {}", path.display());
                Ok(Self {
                    _lock: lock,
                    path: path.to_path_buf(),
                })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(Error::Locked(path.display().to_string())),
            Err((_, errno)) => Err(Error::Io(std::io::Error::from(errno))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
