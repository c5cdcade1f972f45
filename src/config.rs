//! Configuration structures and loading logic

use crate::engine::EngineConfig;
use crate::hub::HubConfig;
use crate::manager::LifecycleSettings;
use crate::servable::ServingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    pub api_port: u16,
    /// Registry namespace used when a request names none
    pub project: String,
    pub stage_root: PathBuf,
    pub registry_root: PathBuf,
    pub fetch_concurrency: usize,
    /// Paths removed from a hub snapshot before upload
    pub strip_exclusions: Vec<String>,
    pub hub: HubConfig,
    pub engine: EngineConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving: Option<ServingConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            project: default_project(),
            stage_root: default_stage_root(),
            registry_root: default_registry_root(),
            fetch_concurrency: default_fetch_concurrency(),
            strip_exclusions: default_strip_exclusions(),
            hub: HubConfig::default(),
            engine: EngineConfig::default(),
            serving: None,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("MODEL_ARTIFACTS_API_PORT") {
            config.api_port = port
                .parse()
                .context("Invalid MODEL_ARTIFACTS_API_PORT value")?;
        }
        if let Ok(project) = std::env::var("MODEL_ARTIFACTS_PROJECT") {
            config.project = project;
        }
        if let Ok(root) = std::env::var("MODEL_ARTIFACTS_REGISTRY_ROOT") {
            config.registry_root = PathBuf::from(root);
        }
        if let Ok(root) = std::env::var("MODEL_ARTIFACTS_STAGE_ROOT") {
            config.stage_root = PathBuf::from(root);
        }
        if let Ok(token) = std::env::var("HF_TOKEN") {
            config.hub.token = Some(token);
        }
        if let Ok(binary_path) = std::env::var("ENGINE_BINARY_PATH") {
            config.engine.binary_path = binary_path;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        crate::registry::validate_name("project", &self.project)?;

        if self.fetch_concurrency == 0 {
            anyhow::bail!("fetch_concurrency must be >= 1");
        }

        for exclusion in &self.strip_exclusions {
            if !crate::stage::is_valid_exclusion(exclusion) {
                anyhow::bail!(
                    "strip exclusion '{}' must be a relative path without '..'",
                    exclusion
                );
            }
        }

        if self.engine.binary_path.is_empty() {
            anyhow::bail!("Engine binary path cannot be empty");
        }
        if self.engine.startup_timeout_secs == 0 || self.engine.request_timeout_secs == 0 {
            anyhow::bail!("Engine timeouts must be greater than zero");
        }

        if let Some(serving) = &self.serving {
            if serving.name.is_empty() {
                anyhow::bail!("Serving name cannot be empty");
            }
            if serving.model_id.is_empty() {
                anyhow::bail!("Serving model_id cannot be empty");
            }
            crate::registry::validate_name("serving display_name", &serving.display_name)?;
        }

        Ok(())
    }

    /// Settings handed to the lifecycle manager
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            stage_root: self.stage_root.clone(),
            strip_exclusions: self.strip_exclusions.clone(),
            hub_name: self.hub.name.clone(),
            fetch_concurrency: self.fetch_concurrency,
            engine_options: self.engine.options.clone(),
        }
    }
}

// Default functions
fn default_api_port() -> u16 {
    9000
}
fn default_project() -> String {
    "default".to_string()
}
fn default_stage_root() -> PathBuf {
    std::env::temp_dir().join("model-artifacts").join("stage")
}
fn default_registry_root() -> PathBuf {
    PathBuf::from("/data/artifact-registry")
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_strip_exclusions() -> Vec<String> {
    vec![".cache".to_string(), ".huggingface".to_string()]
}
