//! Disposable local staging directories
//!
//! A [`LocalStage`] is created before a download and removed when the
//! owning operation finishes. Removal is best effort: failures are logged
//! and counted, never returned, because the artifact may already be
//! durably stored by the time cleanup runs.

use crate::lock::{LOCK_SUFFIX, OwnerLock, lock_path_for};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Prefix for snapshot staging directories
pub const SNAPSHOT_PREFIX: &str = "stage-";
/// Prefix for selective-retrieval directories
pub const TOKENIZER_PREFIX: &str = "tokenizer-";

/// Temporary directory owned by a single operation
///
/// The directory is guarded by a locked `<dir>.lock` sibling for its whole
/// life, so managers sharing a stage root never sweep each other's stages.
/// Dropping the stage removes the directory, so an operation future that is
/// cancelled mid-way still cleans up after itself.
#[derive(Debug)]
pub struct LocalStage {
    path: PathBuf,
    lock: Option<OwnerLock>,
}

impl LocalStage {
    /// Create a fresh, uniquely named directory under `root`
    pub fn create(root: &Path, prefix: &str) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;

        // The lock file claims the name before the directory exists
        let (file, lock_path) = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(LOCK_SUFFIX)
            .tempfile_in(root)?
            .keep()?;
        let lock = OwnerLock::lock(file, lock_path)?;

        let name = lock
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = root.join(name.trim_end_matches(LOCK_SUFFIX));

        if let Err(e) = std::fs::create_dir(&path) {
            if let Err(release) = lock.release() {
                tracing::warn!(error = %release, "Failed to release stage lock");
            }
            return Err(e);
        }

        tracing::debug!(path = ?path, "Created local stage");

        Ok(Self {
            path,
            lock: Some(lock),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory, logging instead of failing
    ///
    /// Returns `true` if nothing is left on disk.
    pub async fn close(mut self) -> bool {
        let path = self.path.clone();
        let lock = self.lock.take();
        match tokio::task::spawn_blocking(move || remove_stage(&path, lock)).await {
            Ok(clean) => clean,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Stage removal task failed");
                crate::metrics::record_cleanup_failure("stage");
                false
            }
        }
    }
}

impl Drop for LocalStage {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let path = std::mem::take(&mut self.path);

        // Keep large deletions off async worker threads
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_stage(&path, Some(lock)));
            }
            Err(_) => {
                remove_stage(&path, Some(lock));
            }
        }
    }
}

/// Remove a stage directory, then its lock
///
/// The lock is only unlinked once the directory is gone. A stage that could
/// not be removed keeps its lock file, and the next sweep retries it.
fn remove_stage(path: &Path, lock: Option<OwnerLock>) -> bool {
    match std::fs::remove_dir_all(path) {
        Ok(()) => tracing::debug!(path = ?path, "Removed local stage"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            report_cleanup_failure(path, &e);
            return false;
        }
    }

    match lock.map(OwnerLock::release) {
        Some(Err(e)) => {
            report_cleanup_failure(&lock_path_for(path), &e);
            false
        }
        _ => true,
    }
}

fn report_cleanup_failure(path: &Path, error: &io::Error) {
    tracing::warn!(path = ?path, error = %error, "Failed to remove local stage");
    crate::metrics::record_cleanup_failure("stage");
}

/// Check that an exclusion is a plain relative path inside the stage
pub fn is_valid_exclusion(exclusion: &str) -> bool {
    let path = Path::new(exclusion);
    !exclusion.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Remove hub-internal paths from a staged snapshot
///
/// Returns the paths that were present and removed.
pub async fn strip_exclusions(root: &Path, exclusions: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for exclusion in exclusions {
        if !is_valid_exclusion(exclusion) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("exclusion '{}' is not a relative path", exclusion),
            ));
        }

        let target = root.join(exclusion);
        let metadata = match tokio::fs::symlink_metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }

        tracing::debug!(path = ?target, "Stripped hub-internal path from stage");
        removed.push(target);
    }

    Ok(removed)
}

/// Paths from `exclusions` still present under `root`
pub fn remaining_exclusions(root: &Path, exclusions: &[String]) -> Vec<PathBuf> {
    exclusions
        .iter()
        .map(|e| root.join(e))
        .filter(|p| p.symlink_metadata().is_ok())
        .collect()
}

/// Remove stage directories whose owner is gone
///
/// A prefixed directory is swept only when its lock can be taken, which
/// means the operation that created it has ended without cleaning up.
/// Stages of live managers sharing `root` are left alone.
pub fn sweep_orphans(root: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut swept = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.starts_with(SNAPSHOT_PREFIX) || name.starts_with(TOKENIZER_PREFIX)) {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let lock = match OwnerLock::try_acquire(lock_path_for(&path)) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                tracing::debug!(path = ?path, "Stage is owned by a live operation; skipping");
                continue;
            }
            Err(e) => {
                report_cleanup_failure(&path, &e);
                continue;
            }
        };

        if remove_stage(&path, Some(lock)) {
            tracing::info!(path = ?path, "Removed orphaned stage from interrupted attempt");
            swept += 1;
        }
    }

    Ok(swept)
}

/// Recursively calculate directory size
pub fn dir_size(path: &Path) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(metadata) = std::fs::metadata(&path) {
                size += metadata.len();
            }
        }
    }

    size
}
