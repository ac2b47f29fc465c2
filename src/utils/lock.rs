//! File-based locking so only one run touches a backup directory at a time.
use anyhow::{Context, Result};
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const LOCK_FILE_NAME: &str = ".backupsync.lock";

/// Advisory lock on `<backup_dir>/.backupsync.lock`.
///
/// The lock is held for as long as the guard returned by
/// [`RunLock::try_acquire`] is alive.
pub struct RunLock {
    lock: RwLock<File>,
    lock_path: PathBuf,
}

impl RunLock {
    pub fn open(backup_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(backup_dir).with_context(|| {
            format!("Failed to create backup directory: {}", backup_dir.display())
        })?;

        let lock_path = backup_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        Ok(Self {
            lock: RwLock::new(file),
            lock_path,
        })
    }

    /// Fails immediately if another run holds the lock.
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        debug!("Attempting to acquire lock: {}", self.lock_path.display());
        let guard = self.lock.try_write().with_context(|| {
            format!(
                "Another backup run is in progress (lock held on {})",
                self.lock_path.display()
            )
        })?;
        info!("Acquired run lock: {}", self.lock_path.display());
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}
