use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Exclusive advisory lock on a certificate pair's lock file.
///
/// Uses `flock(2)`, so it also excludes the `flock(1)` wrapper in cron
/// entries. Released on drop.
#[derive(Debug)]
pub struct PairLock {
    path: PathBuf,
    _file: File,
}

impl PairLock {
    /// Blocks until the lock on `path` is held.
    ///
    /// # Errors
    /// Returns an error if the lock file cannot be opened or locked.
    pub async fn acquire(path: &Path) -> Result<Self> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = open_lock_file(&owned)?;
            debug!("Waiting for lock {}", owned.display());
            file.lock()
                .with_context(|| format!("Failed to lock {}", owned.display()))?;
            Ok(Self {
                path: owned,
                _file: file,
            })
        })
        .await
        .context("Lock task failed")?
    }

    /// Takes the lock only if no other holder exists.
    ///
    /// # Errors
    /// Returns an error if the lock file cannot be opened or the lock call
    /// fails for a reason other than contention.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock() {
            Ok(()) => Ok(Some(Self {
                path: path.to_path_buf(),
                _file: file,
            })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(err)) => {
                Err(err).with_context(|| format!("Failed to lock {}", path.display()))
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))
}
