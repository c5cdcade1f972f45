//! HuggingFace Hub client using hf-hub

use super::ModelHub;
use super::cache::{get_cache_dir, snapshot_cache_dir};
use crate::error::{LifecycleError, LifecycleResult};
use crate::fetcher::RemoteFiles;
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Hub connection settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// Value of the `source` label on stored artifacts
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Access token passed through to the hub
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Shared cache for single-file fetches; defaults to the HF cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: "huggingface".to_string(),
            endpoint: None,
            token: None,
            cache_dir: None,
        }
    }
}

/// [`ModelHub`] backed by the HuggingFace Hub
pub struct HfHub {
    config: HubConfig,
}

impl HfHub {
    pub fn new(config: HubConfig) -> Self {
        Self { config }
    }

    fn api(&self, cache_dir: PathBuf) -> LifecycleResult<Api> {
        let mut builder = ApiBuilder::new()
            .with_cache_dir(cache_dir)
            .with_token(self.config.token.clone())
            .with_progress(false);
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        builder
            .build()
            .map_err(|e| LifecycleError::Transport(format!("Failed to create HF API client: {}", e)))
    }

    fn shared_api(&self) -> LifecycleResult<Api> {
        let cache_dir = self.config.cache_dir.clone().unwrap_or_else(get_cache_dir);
        self.api(cache_dir)
    }

    async fn repo_files(api: &Api, identifier: &str) -> LifecycleResult<Vec<String>> {
        let info = api
            .model(identifier.to_string())
            .info()
            .await
            .map_err(|e| LifecycleError::Transport(format!("Failed to list {}: {}", identifier, e)))?;

        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }
}

#[async_trait]
impl RemoteFiles for HfHub {
    async fn list_files(&self, remote_uri: &str) -> LifecycleResult<Vec<String>> {
        let api = self.shared_api()?;
        Self::repo_files(&api, remote_uri).await
    }

    async fn fetch_file(
        &self,
        remote_uri: &str,
        filename: &str,
        destination: &Path,
    ) -> LifecycleResult<()> {
        let api = self.shared_api()?;
        let cached = api
            .model(remote_uri.to_string())
            .get(filename)
            .await
            .map_err(|e| {
                LifecycleError::Transport(format!("Failed to download {}: {}", filename, e))
            })?;

        // Shared cache entries stay in place; copy follows the snapshot symlink
        tokio::fs::copy(&cached, destination).await?;
        Ok(())
    }
}

#[async_trait]
impl ModelHub for HfHub {
    async fn fetch_snapshot(&self, identifier: &str, destination: &Path) -> LifecycleResult<()> {
        tracing::info!(model_id = %identifier, destination = ?destination, "Starting snapshot download via hf-hub");

        let api = self.api(snapshot_cache_dir(destination))?;
        let files = Self::repo_files(&api, identifier).await?;
        let repo = api.model(identifier.to_string());

        for file in &files {
            if !is_contained(file) {
                return Err(LifecycleError::Transport(format!(
                    "Hub listed unsafe file name '{}' for {}",
                    file, identifier
                )));
            }

            tracing::debug!(model_id = %identifier, file = %file, "Downloading file");
            let cached = repo.get(file).await.map_err(|e| {
                LifecycleError::Transport(format!("Failed to download {}: {}", file, e))
            })?;

            place_file(&cached, &destination.join(file)).await?;
        }

        tracing::info!(model_id = %identifier, file_count = files.len(), "Snapshot download complete");

        Ok(())
    }
}

/// Move a cached blob to its snapshot location
///
/// The snapshot cache lives on the same filesystem as the destination, so
/// a rename avoids holding two copies of large weight files.
async fn place_file(cached: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let blob = tokio::fs::canonicalize(cached).await?;
    if tokio::fs::rename(&blob, target).await.is_err() {
        tokio::fs::copy(&blob, target).await?;
    }
    Ok(())
}

fn is_contained(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
