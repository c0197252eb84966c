//! Cross-process advisory lock guarding the startup bind probe.
//!
//! # Design Decisions
//! - Keyed by a fixed, well-known path shared by every cooperating process
//! - Acquisition blocks without timeout; a stuck holder needs an operator
//! - Released on drop, so every exit path (including errors) unlocks

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Default lock file path.
pub const DEFAULT_LOCK_PATH: &str = "/tmp/listener-topology.lock";

/// Error acquiring the port lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("failed to open lock file '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to lock '{path}': {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An exclusive advisory lock held for the lifetime of the value.
pub struct PortLock {
    path: PathBuf,
    #[cfg(unix)]
    _lock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl PortLock {
    /// Open (creating and truncating) the lock file and take an exclusive lock,
    /// blocking until it is available.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = open_lock_file(path).map_err(|source| LockError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        #[cfg(unix)]
        {
            use nix::fcntl::{Flock, FlockArg};

            let lock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
                LockError::Lock {
                    path: path.to_path_buf(),
                    source: io::Error::from(errno),
                }
            })?;
            tracing::trace!(path = %path.display(), "Port lock acquired");
            Ok(Self {
                path: path.to_path_buf(),
                _lock: lock,
            })
        }

        #[cfg(not(unix))]
        {
            tracing::trace!(path = %path.display(), "Port lock is advisory-only on this platform");
            Ok(Self {
                path: path.to_path_buf(),
                _file: file,
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for PortLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortLock").field("path", &self.path).finish()
    }
}

impl Drop for PortLock {
    fn drop(&mut self) {
        tracing::trace!(path = %self.path.display(), "Port lock released");
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    options.open(path)
}
