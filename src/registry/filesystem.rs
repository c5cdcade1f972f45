//! Directory-backed artifact registry
//!
//! Layout:
//! ```text
//! <root>/<project>/<key>/
//! ├── 1/
//! │   ├── manifest.json
//! │   └── files/...
//! ├── 2/
//! ├── 3.partial/        <- upload in progress (or interrupted)
//! └── 3.partial.lock     <- held by the writer of 3.partial
//! ```
//!
//! A version directory only appears under its final name once every file
//! and the manifest are written, so a crash mid-upload never leaves a
//! readable version behind. Writers claim a version by creating and locking
//! its `.partial.lock` file first; partial uploads are only swept once that
//! lock is free, so processes sharing a root never remove each other's
//! uploads.

use super::{ArtifactRegistry, ArtifactUri, RegistryRecord, validate_name};
use crate::artifact::Labels;
use crate::error::{LifecycleError, LifecycleResult};
use crate::fetcher::RemoteFiles;
use crate::lock::{LOCK_SUFFIX, OwnerLock, lock_path_for};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";
const PARTIAL_SUFFIX: &str = ".partial";

/// [`ArtifactRegistry`] storing bundles on a local or mounted filesystem
#[derive(Debug, Clone)]
pub struct FileSystemRegistry {
    root: PathBuf,
}

impl FileSystemRegistry {
    /// Open (creating if needed) a registry rooted at `root`
    ///
    /// Partial uploads whose writer is gone are removed; those attempts
    /// never reached `Stored`. Uploads still held by a live writer are kept.
    pub fn open(root: impl Into<PathBuf>) -> LifecycleResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let registry = Self { root };
        let swept = registry.sweep_partial_uploads()?;
        if swept > 0 {
            tracing::warn!(
                root = ?registry.root,
                count = swept,
                "Removed partial uploads from interrupted attempts"
            );
        }

        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, project: &str, key: &str) -> PathBuf {
        self.root.join(project).join(key)
    }

    fn version_dir(&self, uri: &ArtifactUri) -> PathBuf {
        self.key_dir(&uri.project, &uri.key)
            .join(uri.version.to_string())
    }

    fn files_dir(&self, remote_uri: &str) -> LifecycleResult<PathBuf> {
        let uri: ArtifactUri = remote_uri.parse()?;
        let files = self.version_dir(&uri).join(FILES_DIR);
        if !files.is_dir() {
            return Err(LifecycleError::NotFound(format!(
                "artifact {} does not exist",
                remote_uri
            )));
        }
        Ok(files)
    }

    fn sweep_partial_uploads(&self) -> io::Result<usize> {
        let mut swept = 0;
        for project in std::fs::read_dir(&self.root)?.flatten() {
            if !project.path().is_dir() {
                continue;
            }
            for key in std::fs::read_dir(project.path())?.flatten() {
                if !key.path().is_dir() {
                    continue;
                }
                for version in std::fs::read_dir(key.path())?.flatten() {
                    let name = version.file_name().to_string_lossy().to_string();
                    if !name.ends_with(PARTIAL_SUFFIX) || !version.path().is_dir() {
                        continue;
                    }
                    let Some(lock) = OwnerLock::try_acquire(lock_path_for(&version.path()))?
                    else {
                        tracing::debug!(path = ?version.path(), "Upload in progress; skipping");
                        continue;
                    };
                    std::fs::remove_dir_all(version.path())?;
                    lock.release()?;
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }
}

/// Parse `N`, `N.partial` or `N.partial.lock` version entry names
///
/// A lock file reserves its version number just like the partial directory.
fn parse_version(name: &str) -> Option<(u64, bool)> {
    if let Some(partial) = name.strip_suffix(LOCK_SUFFIX) {
        return match parse_version(partial) {
            Some((version, true)) => Some((version, true)),
            _ => None,
        };
    }
    match name.strip_suffix(PARTIAL_SUFFIX) {
        Some(version) => version.parse().ok().map(|v| (v, true)),
        None => name.parse().ok().map(|v| (v, false)),
    }
}

fn latest_version(key_dir: &Path, include_partial: bool) -> io::Result<Option<u64>> {
    let entries = match std::fs::read_dir(key_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    Ok(entries
        .flatten()
        .filter_map(|e| parse_version(&e.file_name().to_string_lossy()))
        .filter(|(_, partial)| include_partial || !partial)
        .map(|(v, _)| v)
        .max())
}

/// Version directory being written, owned through its lock
struct PartialUpload {
    version: u64,
    path: PathBuf,
    lock: OwnerLock,
}

/// Reserve the next version by locking `N.partial.lock`, then creating `N.partial`
fn reserve_version(key_dir: &Path) -> io::Result<PartialUpload> {
    std::fs::create_dir_all(key_dir)?;
    loop {
        let version = latest_version(key_dir, true)?.unwrap_or(0) + 1;
        let path = key_dir.join(format!("{}{}", version, PARTIAL_SUFFIX));

        let lock = match OwnerLock::create_new(lock_path_for(&path)) {
            Ok(lock) => lock,
            // Another writer took this version
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        };

        match std::fs::create_dir(&path) {
            Ok(()) => return Ok(PartialUpload { version, path, lock }),
            // A leftover directory keeps its number; try the next one
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => lock.release()?,
            Err(e) => {
                lock.release()?;
                return Err(e);
            }
        }
    }
}

/// Recursively copy `src` into `dst`
///
/// Symlinks are rejected: a bundle holds only regular files, and a link
/// could point outside the staged directory.
fn copy_dir(src: &Path, dst: &Path) -> io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = std::fs::symlink_metadata(entry.path())?.file_type();
        if file_type.is_symlink() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to store symlink {:?}", entry.path()),
            ));
        }
        if file_type.is_dir() {
            copied += copy_dir(&entry.path(), &target)?;
        } else {
            copied += std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

fn list_relative(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            list_relative(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(name);
        }
    }
    Ok(())
}

fn store_blocking(
    key_dir: &Path,
    uri_base: (&str, &str),
    local_dir: &Path,
    labels: &Labels,
) -> LifecycleResult<(String, u64)> {
    let upload = reserve_version(key_dir)?;
    let (version, partial) = (upload.version, upload.path.as_path());
    let uri = ArtifactUri {
        project: uri_base.0.to_string(),
        key: uri_base.1.to_string(),
        version,
    }
    .to_string();

    let write = || -> LifecycleResult<u64> {
        let bytes = copy_dir(local_dir, &partial.join(FILES_DIR))?;
        let record = RegistryRecord {
            key: uri_base.1.to_string(),
            uri: uri.clone(),
            version,
            labels: labels.clone(),
            created_at: chrono::Utc::now(),
        };
        let manifest = serde_json::to_vec_pretty(&record)
            .map_err(|e| LifecycleError::Transport(format!("Failed to encode manifest: {}", e)))?;
        std::fs::write(partial.join(MANIFEST_FILE), manifest)?;
        std::fs::rename(partial, key_dir.join(version.to_string()))?;
        Ok(bytes)
    };

    let outcome = write();
    let removed = match &outcome {
        Ok(_) => true,
        Err(_) => match std::fs::remove_dir_all(partial) {
            Ok(()) => true,
            Err(cleanup) => {
                tracing::warn!(path = ?partial, error = %cleanup, "Failed to remove partial upload");
                crate::metrics::record_cleanup_failure("registry");
                false
            }
        },
    };

    // A partial directory that could not be removed keeps its lock file, so
    // the next sweep can take it once this writer has let go
    if removed && let Err(e) = upload.lock.release() {
        tracing::warn!(path = ?partial, error = %e, "Failed to remove upload lock");
        crate::metrics::record_cleanup_failure("registry");
    }

    outcome.map(|bytes| (uri, bytes))
}

fn join_error(e: tokio::task::JoinError) -> LifecycleError {
    LifecycleError::Io(io::Error::other(e))
}

#[async_trait]
impl RemoteFiles for FileSystemRegistry {
    async fn list_files(&self, remote_uri: &str) -> LifecycleResult<Vec<String>> {
        let files = self.files_dir(remote_uri)?;
        tokio::task::spawn_blocking(move || -> LifecycleResult<Vec<String>> {
            let mut names = Vec::new();
            list_relative(&files, &files, &mut names)?;
            names.sort();
            Ok(names)
        })
        .await
        .map_err(join_error)?
    }

    async fn fetch_file(
        &self,
        remote_uri: &str,
        filename: &str,
        destination: &Path,
    ) -> LifecycleResult<()> {
        let contained = Path::new(filename)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if filename.is_empty() || !contained {
            return Err(LifecycleError::InvalidInput(format!(
                "invalid file name '{}'",
                filename
            )));
        }

        let source = self.files_dir(remote_uri)?.join(filename);
        match tokio::fs::copy(&source, destination).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LifecycleError::Transport(
                format!("{} not found in {}", filename, remote_uri),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArtifactRegistry for FileSystemRegistry {
    async fn store(
        &self,
        project: &str,
        key: &str,
        local_dir: &Path,
        labels: &Labels,
    ) -> LifecycleResult<String> {
        validate_name("project", project)?;
        validate_name("key", key)?;
        if !local_dir.is_dir() {
            return Err(LifecycleError::InvalidInput(format!(
                "{:?} is not a directory",
                local_dir
            )));
        }

        let key_dir = self.key_dir(project, key);
        let project_owned = project.to_string();
        let key_owned = key.to_string();
        let local_dir = local_dir.to_path_buf();
        let labels = labels.clone();

        let (uri, bytes) = tokio::task::spawn_blocking(move || {
            store_blocking(
                &key_dir,
                (&project_owned, &key_owned),
                &local_dir,
                &labels,
            )
        })
        .await
        .map_err(join_error)??;

        tracing::info!(uri = %uri, bytes = bytes, "Stored artifact bundle");

        Ok(uri)
    }

    async fn get_by_key(&self, project: &str, key: &str) -> LifecycleResult<Option<RegistryRecord>> {
        validate_name("project", project)?;
        validate_name("key", key)?;

        let key_dir = self.key_dir(project, key);
        let Some(version) = latest_version(&key_dir, false)? else {
            return Ok(None);
        };

        let manifest = key_dir.join(version.to_string()).join(MANIFEST_FILE);
        let content = tokio::fs::read(&manifest).await?;
        let record: RegistryRecord = serde_json::from_slice(&content).map_err(|e| {
            LifecycleError::Transport(format!("Corrupt manifest {:?}: {}", manifest, e))
        })?;

        Ok(Some(record))
    }

    async fn delete(&self, project: &str, key: &str) -> LifecycleResult<usize> {
        validate_name("project", project)?;
        validate_name("key", key)?;

        let key_dir = self.key_dir(project, key);
        let versions = match std::fs::read_dir(&key_dir) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| matches!(parse_version(&e.file_name().to_string_lossy()), Some((_, false))))
                .count(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        tokio::fs::remove_dir_all(&key_dir).await?;
        tracing::info!(project = %project, key = %key, versions = versions, "Deleted artifact");

        Ok(versions)
    }

    async fn resolve_location(&self, remote_uri: &str) -> LifecycleResult<String> {
        let files = self.files_dir(remote_uri)?;
        Ok(files.to_string_lossy().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bundle() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), b"{\"model_type\":\"llama\"}").unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"\x00\x01").unwrap();
        std::fs::create_dir(dir.path().join("onnx")).unwrap();
        std::fs::write(dir.path().join("onnx/model.onnx"), b"onnx").unwrap();
        dir
    }

    fn labels() -> Labels {
        let mut labels = Labels::new();
        labels.insert("framework".to_string(), "vllm".to_string());
        labels
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let src = bundle();

        let uri = registry
            .store("default", "tiny", src.path(), &labels())
            .await
            .unwrap();
        assert_eq!(uri, "store://artifacts/default/tiny#1");

        let record = registry.get_by_key("default", "tiny").await.unwrap().unwrap();
        assert_eq!(record.uri, uri);
        assert_eq!(record.version, 1);
        assert_eq!(record.labels["framework"], "vllm");

        // Source is left untouched
        assert!(src.path().join("model.safetensors").exists());
    }

    #[tokio::test]
    async fn test_store_twice_creates_two_versions() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let src = bundle();

        let first = registry.store("p", "k", src.path(), &labels()).await.unwrap();
        let second = registry.store("p", "k", src.path(), &labels()).await.unwrap();

        assert_ne!(first, second);
        let record = registry.get_by_key("p", "k").await.unwrap().unwrap();
        assert_eq!(record.uri, second);
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        assert!(registry.get_by_key("p", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let src = bundle();

        registry.store("team-a", "k", src.path(), &labels()).await.unwrap();
        assert!(registry.get_by_key("team-b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_fetch_files() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let src = bundle();
        let uri = registry.store("p", "k", src.path(), &labels()).await.unwrap();

        let files = registry.list_files(&uri).await.unwrap();
        assert_eq!(
            files,
            vec!["config.json", "model.safetensors", "onnx/model.onnx"]
        );

        let out = TempDir::new().unwrap();
        let dest = out.path().join("config.json");
        registry.fetch_file(&uri, "config.json", &dest).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dest).unwrap(),
            "{\"model_type\":\"llama\"}"
        );

        let missing = registry
            .fetch_file(&uri, "tokenizer.json", &out.path().join("tokenizer.json"))
            .await;
        assert!(matches!(missing, Err(LifecycleError::Transport(_))));

        let escape = registry
            .fetch_file(&uri, "../../manifest.json", &out.path().join("x"))
            .await;
        assert!(matches!(escape, Err(LifecycleError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_list_unknown_uri() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let result = registry.list_files("store://artifacts/p/k#9").await;
        assert!(matches!(result, Err(LifecycleError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_all_versions() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let src = bundle();
        registry.store("p", "k", src.path(), &labels()).await.unwrap();
        registry.store("p", "k", src.path(), &labels()).await.unwrap();

        assert_eq!(registry.delete("p", "k").await.unwrap(), 2);
        assert!(registry.get_by_key("p", "k").await.unwrap().is_none());
        assert_eq!(registry.delete("p", "k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolve_location() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let src = bundle();
        let uri = registry.store("p", "k", src.path(), &labels()).await.unwrap();

        let location = registry.resolve_location(&uri).await.unwrap();
        assert!(Path::new(&location).join("model.safetensors").exists());
    }

    #[test]
    fn test_open_sweeps_partial_uploads() {
        let root = TempDir::new().unwrap();
        let key_dir = root.path().join("p/k");
        std::fs::create_dir_all(key_dir.join("1/files")).unwrap();
        std::fs::create_dir_all(key_dir.join("2.partial/files")).unwrap();

        FileSystemRegistry::open(root.path()).unwrap();

        assert!(key_dir.join("1").exists());
        assert!(!key_dir.join("2.partial").exists());
        assert!(!key_dir.join("2.partial.lock").exists());
    }

    #[test]
    fn test_open_keeps_upload_of_live_writer() {
        let root = TempDir::new().unwrap();
        let key_dir = root.path().join("p/k");
        std::fs::create_dir_all(&key_dir).unwrap();
        let upload = reserve_version(&key_dir).unwrap();
        std::fs::write(upload.path.join("weights.bin"), b"0123").unwrap();

        FileSystemRegistry::open(root.path()).unwrap();
        assert!(upload.path.join("weights.bin").is_file());

        // Once the writer is gone the next open sweeps it
        let path = upload.path.clone();
        drop(upload);
        FileSystemRegistry::open(root.path()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_reserve_skips_locked_version() {
        let root = TempDir::new().unwrap();
        let key_dir = root.path().join("p/k");
        let first = reserve_version(&key_dir).unwrap();
        let second = reserve_version(&key_dir).unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(first.lock.path().ends_with("1.partial.lock"));
    }

    #[tokio::test]
    async fn test_store_leaves_no_lock_behind() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let src = bundle();
        registry.store("p", "k", src.path(), &labels()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(root.path().join("p/k"))
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["1"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_store_rejects_symlinks() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();

        let src = bundle();
        std::os::unix::fs::symlink(outside.path(), src.path().join("escape")).unwrap();

        let result = registry.store("p", "k", src.path(), &labels()).await;
        match result {
            Err(LifecycleError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput),
            other => panic!("expected symlink rejection, got {:?}", other),
        }
        assert!(registry.get_by_key("p", "k").await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(root.path().join("p/k")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_partial_versions_are_invisible() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        std::fs::create_dir_all(root.path().join("p/k/1.partial")).unwrap();

        assert!(registry.get_by_key("p", "k").await.unwrap().is_none());

        // The reserved number is skipped by the next writer
        let src = bundle();
        let uri = registry.store("p", "k", src.path(), &labels()).await.unwrap();
        assert_eq!(uri, "store://artifacts/p/k#2");
    }

    #[tokio::test]
    async fn test_store_rejects_bad_key() {
        let root = TempDir::new().unwrap();
        let registry = FileSystemRegistry::open(root.path()).unwrap();
        let src = bundle();
        let result = registry.store("p", "../k", src.path(), &labels()).await;
        assert!(matches!(result, Err(LifecycleError::InvalidInput(_))));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("3"), Some((3, false)));
        assert_eq!(parse_version("4.partial"), Some((4, true)));
        assert_eq!(parse_version("5.partial.lock"), Some((5, true)));
        assert_eq!(parse_version("5.lock"), None);
        assert_eq!(parse_version("manifest.json"), None);
    }
}
