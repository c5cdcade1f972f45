//! Advisory ownership locks for work directories
//!
//! A work directory `<name>` is owned through a sibling `<name>.lock` file
//! that is created and locked before the directory itself exists. The OS
//! drops the lock when the owning process exits, so a sweeper that can take
//! the lock knows the owner is gone. Locks are per open file, so two owners
//! in the same process also exclude each other.

use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};

/// Suffix of the lock file next to an owned directory
pub const LOCK_SUFFIX: &str = ".lock";

/// Lock file path for the directory at `dir`
pub fn lock_path_for(dir: &Path) -> PathBuf {
    let mut name = dir.as_os_str().to_os_string();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Held lock on `<dir>.lock`
#[derive(Debug)]
pub struct OwnerLock {
    file: File,
    path: PathBuf,
}

impl OwnerLock {
    /// Lock an already created lock file
    pub fn lock(file: File, path: PathBuf) -> io::Result<Self> {
        file.lock()?;
        Ok(Self { file, path })
    }

    /// Create `path` (which must not exist) and lock it
    pub fn create_new(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Self::lock(file, path)
    }

    /// Take the lock of a possibly abandoned directory
    ///
    /// Returns `None` while a live owner holds it.
    pub fn try_acquire(path: PathBuf) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file, then release the lock
    pub fn release(self) -> io::Result<()> {
        let removed = match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
        drop(self.file);
        removed
    }
}
