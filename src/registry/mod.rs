//! Artifact registry client
//!
//! The registry is the single source of truth for durable artifacts: named,
//! labeled, versioned file bundles scoped to a project. [`ArtifactRegistry`]
//! is the boundary; [`FileSystemRegistry`] is a directory-backed store.

pub mod filesystem;

pub use filesystem::FileSystemRegistry;

use crate::artifact::Labels;
use crate::error::{LifecycleError, LifecycleResult};
use crate::fetcher::RemoteFiles;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const URI_SCHEME: &str = "store://artifacts/";

/// Registry entry for one stored version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub key: String,
    pub uri: String,
    pub version: u64,
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
}

/// Durable store for labeled file bundles
///
/// `list_files`/`fetch_file` (from [`RemoteFiles`]) take a registry URI.
#[async_trait]
pub trait ArtifactRegistry: RemoteFiles {
    /// Store `local_dir` as a new version of `key`; returns its URI
    async fn store(
        &self,
        project: &str,
        key: &str,
        local_dir: &Path,
        labels: &Labels,
    ) -> LifecycleResult<String>;

    /// Latest version of `key`, if any
    async fn get_by_key(&self, project: &str, key: &str) -> LifecycleResult<Option<RegistryRecord>>;

    /// Remove every version of `key`; returns how many were removed
    async fn delete(&self, project: &str, key: &str) -> LifecycleResult<usize>;

    /// Location an inference engine can load the stored files from
    async fn resolve_location(&self, remote_uri: &str) -> LifecycleResult<String>;
}

/// Parsed `store://artifacts/<project>/<key>#<version>` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUri {
    pub project: String,
    pub key: String,
    pub version: u64,
}

impl fmt::Display for ArtifactUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}#{}", URI_SCHEME, self.project, self.key, self.version)
    }
}

impl FromStr for ArtifactUri {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LifecycleError::InvalidInput(format!("invalid artifact URI '{}'", s));

        let rest = s.strip_prefix(URI_SCHEME).ok_or_else(invalid)?;
        let (path, version) = rest.rsplit_once('#').ok_or_else(invalid)?;
        let (project, key) = path.split_once('/').ok_or_else(invalid)?;
        let version = version.parse().map_err(|_| invalid())?;

        validate_name("project", project).map_err(|_| invalid())?;
        validate_name("key", key).map_err(|_| invalid())?;

        Ok(Self {
            project: project.to_string(),
            key: key.to_string(),
            version,
        })
    }
}

/// Project and key names become directory names
pub fn validate_name(kind: &str, name: &str) -> LifecycleResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '#']);
    if valid {
        Ok(())
    } else {
        Err(LifecycleError::InvalidInput(format!(
            "{} '{}' must be non-empty, must not start with '.' and must not contain '/', '\\' or '#'",
            kind, name
        )))
    }
}
