//! Shared fakes for integration tests
//!
//! `FakeHub` writes a snapshot the way hf-hub does (files plus a
//! `.cache/huggingface` bookkeeping directory), `FakeEngineFactory`
//! records what each engine was built with, and `FaultyRegistry` wraps the
//! filesystem registry to inject upload and cleanup faults.

#![allow(dead_code)]

use async_trait::async_trait;
use model_artifacts::engine::{EngineOptions, GenerationOutput, SamplingParams};
use model_artifacts::fetcher::RemoteFiles;
use model_artifacts::registry::RegistryRecord;
use model_artifacts::{
    ArtifactManager, ArtifactRegistry, EngineFactory, FileSystemRegistry, InferenceEngine,
    Labels, LifecycleError, LifecycleResult, LifecycleSettings, ModelHub,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Files of a small model snapshot
pub fn tiny_model_files() -> Vec<(String, Vec<u8>)> {
    vec![
        (
            "config.json".to_string(),
            br#"{"model_type":"llama","architectures":["LlamaForCausalLM"],"vocab_size":32000,"max_position_embeddings":2048}"#.to_vec(),
        ),
        ("tokenizer.json".to_string(), br#"{"version":"1.0"}"#.to_vec()),
        (
            "tokenizer_config.json".to_string(),
            br#"{"bos_token":"<s>"}"#.to_vec(),
        ),
        ("generation_config.json".to_string(), b"{}".to_vec()),
        ("model.safetensors".to_string(), vec![7u8; 4096]),
        ("README.md".to_string(), b"# tiny model".to_vec()),
    ]
}

#[derive(Default)]
pub struct FakeHub {
    files: Vec<(String, Vec<u8>)>,
    /// Fail after writing this many files
    fail_after: Option<usize>,
    /// Never finish after writing the first file
    stall: bool,
    /// Pause after writing the first file until released
    gate: Option<Arc<Gate>>,
    destinations: Mutex<Vec<PathBuf>>,
}

/// Pauses a snapshot download mid-way
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until a download has written its first file
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the paused download continue
    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl FakeHub {
    pub fn tiny_model() -> Self {
        Self {
            files: tiny_model_files(),
            ..Default::default()
        }
    }

    pub fn failing_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::tiny_model()
        }
    }

    pub fn stalling() -> Self {
        Self {
            stall: true,
            ..Self::tiny_model()
        }
    }

    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::tiny_model()
        }
    }

    /// Snapshot destinations requested so far
    pub fn destinations(&self) -> Vec<PathBuf> {
        self.destinations.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteFiles for FakeHub {
    async fn list_files(&self, _remote_uri: &str) -> LifecycleResult<Vec<String>> {
        Ok(self.files.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn fetch_file(
        &self,
        _remote_uri: &str,
        filename: &str,
        destination: &Path,
    ) -> LifecycleResult<()> {
        let (_, content) = self
            .files
            .iter()
            .find(|(name, _)| name == filename)
            .ok_or_else(|| LifecycleError::Transport(format!("{} not found", filename)))?;
        tokio::fs::write(destination, content).await?;
        Ok(())
    }
}

#[async_trait]
impl ModelHub for FakeHub {
    async fn fetch_snapshot(&self, _identifier: &str, destination: &Path) -> LifecycleResult<()> {
        self.destinations
            .lock()
            .unwrap()
            .push(destination.to_path_buf());

        let locks = destination.join(".cache/huggingface/download");
        tokio::fs::create_dir_all(&locks).await?;

        for (i, (name, content)) in self.files.iter().enumerate() {
            if self.fail_after == Some(i) {
                return Err(LifecycleError::Transport(format!(
                    "connection reset while downloading {}",
                    name
                )));
            }
            tokio::fs::write(locks.join(format!("{}.lock", name)), b"").await?;
            tokio::fs::write(destination.join(name), content).await?;

            if self.stall {
                futures::future::pending::<()>().await;
            }
            if let (0, Some(gate)) = (i, &self.gate) {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Echo prompts back, outputs in reverse order
    Echo,
    FailBuild,
    FailGenerate,
    /// Return one output fewer than prompts
    DropOutput,
}

/// What one engine was built with
#[derive(Debug, Clone)]
pub struct BuildRecord {
    pub model_location: String,
    pub tokenizer_dir: PathBuf,
    /// File names present in the tokenizer dir at build time
    pub tokenizer_files: Vec<String>,
    pub options: EngineOptions,
}

pub struct FakeEngineFactory {
    mode: EngineMode,
    builds: Mutex<Vec<BuildRecord>>,
}

impl FakeEngineFactory {
    pub fn new(mode: EngineMode) -> Self {
        Self {
            mode,
            builds: Mutex::new(Vec::new()),
        }
    }

    pub fn builds(&self) -> Vec<BuildRecord> {
        self.builds.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    fn name(&self) -> &str {
        "vllm"
    }

    async fn build(
        &self,
        model_location: &str,
        tokenizer_dir: &Path,
        options: &EngineOptions,
    ) -> LifecycleResult<Box<dyn InferenceEngine>> {
        let mut tokenizer_files: Vec<String> = std::fs::read_dir(tokenizer_dir)?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        tokenizer_files.sort();

        self.builds.lock().unwrap().push(BuildRecord {
            model_location: model_location.to_string(),
            tokenizer_dir: tokenizer_dir.to_path_buf(),
            tokenizer_files,
            options: options.clone(),
        });

        if self.mode == EngineMode::FailBuild {
            return Err(LifecycleError::EngineConstruction(
                "CUDA out of memory".to_string(),
            ));
        }

        Ok(Box::new(FakeEngine { mode: self.mode }))
    }
}

struct FakeEngine {
    mode: EngineMode,
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    async fn generate(
        &self,
        prompts: &[String],
        _params: &SamplingParams,
    ) -> LifecycleResult<Vec<GenerationOutput>> {
        if self.mode == EngineMode::FailGenerate {
            return Err(LifecycleError::Generation("prompt too long".to_string()));
        }

        let mut outputs: Vec<GenerationOutput> = prompts
            .iter()
            .enumerate()
            .rev()
            .map(|(index, prompt)| GenerationOutput {
                index,
                text: format!("echo: {}", prompt),
                finish_reason: Some("stop".to_string()),
            })
            .collect();

        if self.mode == EngineMode::DropOutput {
            outputs.pop();
        }

        Ok(outputs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    Pass,
    /// Uploads fail with a transport error and store nothing
    FailStore,
    /// Uploads succeed, then the local directory is replaced by a plain
    /// file so removing it fails
    BlockCleanup,
}

/// Filesystem registry with injected faults
pub struct FaultyRegistry {
    inner: Arc<FileSystemRegistry>,
    mode: RegistryMode,
}

#[async_trait]
impl RemoteFiles for FaultyRegistry {
    async fn list_files(&self, remote_uri: &str) -> LifecycleResult<Vec<String>> {
        self.inner.list_files(remote_uri).await
    }

    async fn fetch_file(
        &self,
        remote_uri: &str,
        filename: &str,
        destination: &Path,
    ) -> LifecycleResult<()> {
        self.inner.fetch_file(remote_uri, filename, destination).await
    }
}

#[async_trait]
impl ArtifactRegistry for FaultyRegistry {
    async fn store(
        &self,
        project: &str,
        key: &str,
        local_dir: &Path,
        labels: &Labels,
    ) -> LifecycleResult<String> {
        if self.mode == RegistryMode::FailStore {
            return Err(LifecycleError::Transport(
                "registry unavailable: 503".to_string(),
            ));
        }

        let uri = self.inner.store(project, key, local_dir, labels).await?;
        if self.mode == RegistryMode::BlockCleanup {
            tokio::fs::remove_dir_all(local_dir).await?;
            tokio::fs::write(local_dir, b"in the way").await?;
        }
        Ok(uri)
    }

    async fn get_by_key(&self, project: &str, key: &str) -> LifecycleResult<Option<RegistryRecord>> {
        self.inner.get_by_key(project, key).await
    }

    async fn delete(&self, project: &str, key: &str) -> LifecycleResult<usize> {
        self.inner.delete(project, key).await
    }

    async fn resolve_location(&self, remote_uri: &str) -> LifecycleResult<String> {
        self.inner.resolve_location(remote_uri).await
    }
}

/// Manager wired to fakes and a registry in a temp dir
pub struct Harness {
    pub temp: TempDir,
    pub hub: Arc<FakeHub>,
    pub engines: Arc<FakeEngineFactory>,
    pub registry: Arc<FileSystemRegistry>,
    pub manager: ArtifactManager,
}

impl Harness {
    pub fn new(hub: FakeHub, mode: EngineMode) -> Self {
        Self::with_registry(hub, mode, RegistryMode::Pass)
    }

    pub fn with_registry(hub: FakeHub, mode: EngineMode, registry_mode: RegistryMode) -> Self {
        let temp = TempDir::new().unwrap();
        let hub = Arc::new(hub);
        let engines = Arc::new(FakeEngineFactory::new(mode));
        let registry = Arc::new(FileSystemRegistry::open(temp.path().join("registry")).unwrap());

        let manager_registry: Arc<dyn ArtifactRegistry> = match registry_mode {
            RegistryMode::Pass => registry.clone(),
            faulty => Arc::new(FaultyRegistry {
                inner: registry.clone(),
                mode: faulty,
            }),
        };
        let manager = ArtifactManager::new(
            hub.clone(),
            manager_registry,
            engines.clone(),
            settings(temp.path()),
        );

        Self {
            temp,
            hub,
            engines,
            registry,
            manager,
        }
    }

    pub fn tiny() -> Self {
        Self::new(FakeHub::tiny_model(), EngineMode::Echo)
    }

    /// Another manager, as a second process would build it, sharing this
    /// harness's stage root and registry root
    pub fn sibling_manager(&self, hub: FakeHub) -> ArtifactManager {
        let registry = FileSystemRegistry::open(self.temp.path().join("registry")).unwrap();
        ArtifactManager::new(
            Arc::new(hub),
            Arc::new(registry),
            self.engines.clone(),
            settings(self.temp.path()),
        )
    }

    pub fn stage_root(&self) -> PathBuf {
        self.temp.path().join("stage")
    }

    /// Directories currently under the stage root
    pub fn stage_entries(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.stage_root())
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

fn settings(root: &Path) -> LifecycleSettings {
    let mut engine_options = EngineOptions::new();
    engine_options.insert("gpu_memory_utilization".to_string(), serde_json::json!(0.9));
    engine_options.insert("max_model_len".to_string(), serde_json::json!(2048));

    LifecycleSettings {
        stage_root: root.join("stage"),
        engine_options,
        ..Default::default()
    }
}

/// Wait for background cleanup to remove every path in `paths`
pub async fn removed_eventually(paths: &[PathBuf]) -> bool {
    for _ in 0..200 {
        if paths.iter().all(|p| !p.exists()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
