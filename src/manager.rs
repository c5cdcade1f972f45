//! Artifact lifecycle manager
//!
//! Moves models from the hub into the registry (download, strip, upload,
//! purge) and back out again for inference (list, select, stage). Every
//! operation takes an [`ExecutionContext`] and runs inside its span; local
//! directories are owned by a [`LocalStage`] so they are released on every
//! exit path, including cancellation.

use crate::artifact::{Labels, ModelArtifact};
use crate::context::ExecutionContext;
use crate::engine::{
    EngineFactory, EngineOptions, GenerationOutput, SamplingParams, merge_options, order_outputs,
};
use crate::error::{LifecycleError, LifecycleResult};
use crate::fetcher::{AllowList, RetrievalResult, fetch_matching};
use crate::hub::ModelHub;
use crate::metadata::{ModelSummary, parse_model_config};
use crate::registry::{ArtifactRegistry, validate_name};
use crate::stage::{
    LocalStage, SNAPSHOT_PREFIX, TOKENIZER_PREFIX, remaining_exclusions, strip_exclusions,
    sweep_orphans,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

/// Label naming the inference engine the artifact is packaged for
pub const LABEL_FRAMEWORK: &str = "framework";
/// Label naming the hub the artifact was downloaded from
pub const LABEL_SOURCE: &str = "source";
/// Label holding the hub-side model identifier
pub const LABEL_MODEL_ID: &str = "model_id";

/// Settings shared by every operation of one manager
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Parent of all local stages
    pub stage_root: PathBuf,
    /// Paths removed from a snapshot before upload
    pub strip_exclusions: Vec<String>,
    /// Value of the `source` label
    pub hub_name: String,
    pub fetch_concurrency: usize,
    /// Engine options applied before per-call overrides
    pub engine_options: EngineOptions,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            stage_root: std::env::temp_dir().join("model-artifacts").join("stage"),
            strip_exclusions: vec![".cache".to_string(), ".huggingface".to_string()],
            hub_name: "huggingface".to_string(),
            fetch_concurrency: 4,
            engine_options: EngineOptions::new(),
        }
    }
}

/// Tokenizer files retrieved into a temporary directory
///
/// The directory is removed by [`TokenizerBundle::close`] or on drop.
#[derive(Debug)]
pub struct TokenizerBundle {
    stage: LocalStage,
    result: RetrievalResult,
    summary: Option<ModelSummary>,
}

impl TokenizerBundle {
    pub fn path(&self) -> &Path {
        self.stage.path()
    }

    pub fn result(&self) -> &RetrievalResult {
        &self.result
    }

    /// Parsed config.json, if it was retrieved
    pub fn summary(&self) -> Option<&ModelSummary> {
        self.summary.as_ref()
    }

    /// Remove the directory; returns the retrieval result
    pub async fn close(self) -> RetrievalResult {
        self.stage.close().await;
        self.result
    }
}

/// Orchestrates hub, registry and engine
///
/// Cheap to clone; clones share collaborators and settings.
#[derive(Clone)]
pub struct ArtifactManager {
    hub: Arc<dyn ModelHub>,
    registry: Arc<dyn ArtifactRegistry>,
    engines: Arc<dyn EngineFactory>,
    settings: Arc<LifecycleSettings>,
}

impl ArtifactManager {
    /// Create a manager, removing stages whose owning operation has ended
    ///
    /// Stages still held by another manager on the same root are kept.
    pub fn new(
        hub: Arc<dyn ModelHub>,
        registry: Arc<dyn ArtifactRegistry>,
        engines: Arc<dyn EngineFactory>,
        settings: LifecycleSettings,
    ) -> Self {
        match sweep_orphans(&settings.stage_root) {
            Ok(0) => {}
            Ok(swept) => {
                tracing::warn!(swept, stage_root = ?settings.stage_root, "Interrupted attempts found on startup; marked as failed");
            }
            Err(e) => {
                tracing::warn!(stage_root = ?settings.stage_root, error = %e, "Failed to sweep stage root");
            }
        }

        Self {
            hub,
            registry,
            engines,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn engine_name(&self) -> &str {
        self.engines.name()
    }

    /// Download a hub snapshot and store it in the registry
    ///
    /// On success the artifact is `LocalPurged` and no local copy remains.
    /// On failure the error is [`LifecycleError::StoreFailed`] carrying the
    /// artifact in `Failed` status.
    pub async fn store_from_hub(
        &self,
        ctx: &ExecutionContext,
        identifier: &str,
        display_name: &str,
        labels: Labels,
    ) -> LifecycleResult<ModelArtifact> {
        self.store_inner(ctx.project(), identifier, display_name, labels)
            .instrument(ctx.span())
            .await
    }

    async fn store_inner(
        &self,
        project: &str,
        identifier: &str,
        display_name: &str,
        labels: Labels,
    ) -> LifecycleResult<ModelArtifact> {
        if identifier.trim().is_empty() {
            return Err(LifecycleError::InvalidInput(
                "model identifier must not be empty".to_string(),
            ));
        }
        validate_name("display name", display_name)?;

        let mut artifact = ModelArtifact::new(identifier, display_name);
        artifact.begin_download()?;
        tracing::info!(model_id = %identifier, display_name = %display_name, "Storing model from hub");

        let stage = match LocalStage::create(&self.settings.stage_root, SNAPSHOT_PREFIX) {
            Ok(stage) => stage,
            Err(e) => return Err(self.fail_store(artifact, e.into())),
        };

        let outcome = self
            .stage_and_upload(project, &mut artifact, &stage, labels)
            .await;

        // Cleanup failures are logged by the stage and never change the outcome
        stage.close().await;

        match outcome {
            Ok(()) => {
                artifact.mark_purged()?;
                crate::metrics::record_store("stored");
                tracing::info!(
                    display_name = %display_name,
                    remote_uri = artifact.remote_uri().unwrap_or_default(),
                    "Model stored; local copy purged"
                );
                Ok(artifact)
            }
            Err(e) => Err(self.fail_store(artifact, e)),
        }
    }

    async fn stage_and_upload(
        &self,
        project: &str,
        artifact: &mut ModelArtifact,
        stage: &LocalStage,
        extra_labels: Labels,
    ) -> LifecycleResult<()> {
        self.hub
            .fetch_snapshot(artifact.identifier(), stage.path())
            .await?;
        artifact.mark_staged(stage.path())?;

        let stripped = strip_exclusions(stage.path(), &self.settings.strip_exclusions).await?;
        let leftover = remaining_exclusions(stage.path(), &self.settings.strip_exclusions);
        if !leftover.is_empty() {
            return Err(LifecycleError::Io(std::io::Error::other(format!(
                "hub-internal paths remain after strip: {:?}",
                leftover
            ))));
        }
        tracing::debug!(
            stripped = stripped.len(),
            size_bytes = crate::stage::dir_size(stage.path()),
            "Snapshot staged"
        );

        let mut labels = extra_labels;
        labels.insert(LABEL_FRAMEWORK.to_string(), self.engines.name().to_string());
        labels.insert(LABEL_SOURCE.to_string(), self.settings.hub_name.clone());
        labels.insert(
            LABEL_MODEL_ID.to_string(),
            artifact.identifier().to_string(),
        );
        artifact.begin_upload(labels)?;

        let uri = self
            .registry
            .store(
                project,
                artifact.display_name(),
                stage.path(),
                artifact.labels(),
            )
            .await?;
        artifact.mark_stored(uri)?;

        Ok(())
    }

    fn fail_store(&self, mut artifact: ModelArtifact, source: LifecycleError) -> LifecycleError {
        tracing::error!(
            model_id = %artifact.identifier(),
            display_name = %artifact.display_name(),
            status = %artifact.status(),
            error = %source,
            "Store from hub failed"
        );
        if let Err(e) = artifact.mark_failed(source.to_string()) {
            tracing::warn!(error = %e, "Could not mark artifact as failed");
        }
        crate::metrics::record_store("failed");

        LifecycleError::StoreFailed {
            artifact: Box::new(artifact),
            source: Box::new(source),
        }
    }

    /// Latest stored version of `display_name` in the context's project
    pub async fn lookup(
        &self,
        ctx: &ExecutionContext,
        display_name: &str,
    ) -> LifecycleResult<ModelArtifact> {
        self.lookup_inner(ctx.project(), display_name)
            .instrument(ctx.span())
            .await
    }

    async fn lookup_inner(&self, project: &str, display_name: &str) -> LifecycleResult<ModelArtifact> {
        let record = self
            .registry
            .get_by_key(project, display_name)
            .await?
            .ok_or_else(|| {
                LifecycleError::NotFound(format!(
                    "artifact '{}' in project '{}'",
                    display_name, project
                ))
            })?;

        let identifier = record
            .labels
            .get(LABEL_MODEL_ID)
            .cloned()
            .unwrap_or_default();

        tracing::debug!(display_name = %display_name, remote_uri = %record.uri, version = record.version, "Artifact found");

        Ok(ModelArtifact::stored(
            identifier,
            display_name,
            record.uri,
            record.labels,
        ))
    }

    /// Fetch only the tokenizer files of a stored artifact
    ///
    /// Missing files are reported in the result, not as errors.
    pub async fn retrieve_tokenizer(
        &self,
        ctx: &ExecutionContext,
        artifact: &ModelArtifact,
    ) -> LifecycleResult<TokenizerBundle> {
        self.retrieve_tokenizer_inner(artifact)
            .instrument(ctx.span())
            .await
    }

    async fn retrieve_tokenizer_inner(
        &self,
        artifact: &ModelArtifact,
    ) -> LifecycleResult<TokenizerBundle> {
        let uri = artifact.require_durable()?;
        let listing = self.registry.list_files(uri).await?;

        let stage = LocalStage::create(&self.settings.stage_root, TOKENIZER_PREFIX)?;
        let result = fetch_matching(
            self.registry.as_ref(),
            uri,
            &listing,
            &AllowList::tokenizer(),
            stage.path(),
            self.settings.fetch_concurrency,
        )
        .await?;

        let missing: Vec<&str> = result.missing().collect();
        let failed = result.failed().count();
        let fetched = result.fetched().count();
        crate::metrics::record_tokenizer_files(fetched, missing.len(), failed);

        if !missing.is_empty() {
            tracing::info!(remote_uri = %uri, missing = ?missing, "Some tokenizer files are not present in the artifact");
        }

        let summary = parse_model_config(stage.path());
        tracing::info!(
            display_name = %artifact.display_name(),
            fetched,
            skipped = result.skipped().len(),
            model_type = summary.as_ref().and_then(|s| s.model_type.as_deref()).unwrap_or("unknown"),
            "Tokenizer retrieved"
        );

        Ok(TokenizerBundle {
            stage,
            result,
            summary,
        })
    }

    /// Generate completions for `prompts` with the artifact's model
    ///
    /// Outputs are returned in prompt order. The temporary tokenizer
    /// directory is removed on every exit path.
    pub async fn run_offline_inference(
        &self,
        ctx: &ExecutionContext,
        artifact: &ModelArtifact,
        prompts: &[String],
        sampling: &SamplingParams,
        extra_options: &EngineOptions,
    ) -> LifecycleResult<Vec<GenerationOutput>> {
        self.inference_inner(artifact, prompts, sampling, extra_options)
            .instrument(ctx.span())
            .await
    }

    async fn inference_inner(
        &self,
        artifact: &ModelArtifact,
        prompts: &[String],
        sampling: &SamplingParams,
        extra_options: &EngineOptions,
    ) -> LifecycleResult<Vec<GenerationOutput>> {
        if prompts.is_empty() {
            return Err(LifecycleError::InvalidInput(
                "at least one prompt is required".to_string(),
            ));
        }
        sampling.validate()?;
        let uri = artifact.require_durable()?;

        let bundle = self.retrieve_tokenizer_inner(artifact).await?;
        let outcome = self
            .generate_with(&bundle, uri, prompts, sampling, extra_options)
            .await;
        bundle.close().await;

        outcome
    }

    async fn generate_with(
        &self,
        bundle: &TokenizerBundle,
        uri: &str,
        prompts: &[String],
        sampling: &SamplingParams,
        extra_options: &EngineOptions,
    ) -> LifecycleResult<Vec<GenerationOutput>> {
        if let Some(entry) = bundle.result().failed().next() {
            return Err(LifecycleError::Transport(format!(
                "tokenizer file '{}' could not be retrieved",
                entry.filename
            )));
        }

        let location = self.registry.resolve_location(uri).await?;
        let options = merge_options(&self.settings.engine_options, extra_options);

        let engine = self.engines.build(&location, bundle.path(), &options).await?;
        tracing::info!(engine = %self.engines.name(), prompts = prompts.len(), "Submitting prompt batch");

        let outputs = engine.generate(prompts, sampling).await?;
        let ordered = order_outputs(prompts.len(), outputs)?;
        crate::metrics::record_inference_prompts(ordered.len());

        Ok(ordered)
    }

    /// Remove every stored version of `display_name`
    pub async fn evict(&self, ctx: &ExecutionContext, display_name: &str) -> LifecycleResult<usize> {
        let project = ctx.project();
        async {
            let removed = self.registry.delete(project, display_name).await?;
            if removed == 0 {
                return Err(LifecycleError::NotFound(format!(
                    "artifact '{}' in project '{}'",
                    display_name, project
                )));
            }

            crate::metrics::record_eviction(removed);
            tracing::info!(display_name = %display_name, versions = removed, "Artifact evicted");
            Ok(removed)
        }
        .instrument(ctx.span())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStatus;
    use crate::engine::InferenceEngine;
    use crate::fetcher::RemoteFiles;
    use crate::registry::FileSystemRegistry;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Hub that writes a fixed snapshot, including a hub cache directory
    struct StaticHub;

    #[async_trait]
    impl RemoteFiles for StaticHub {
        async fn list_files(&self, _remote_uri: &str) -> LifecycleResult<Vec<String>> {
            Ok(vec!["config.json".to_string()])
        }

        async fn fetch_file(&self, _: &str, _: &str, destination: &Path) -> LifecycleResult<()> {
            std::fs::write(destination, b"{}")?;
            Ok(())
        }
    }

    #[async_trait]
    impl ModelHub for StaticHub {
        async fn fetch_snapshot(&self, _identifier: &str, destination: &Path) -> LifecycleResult<()> {
            std::fs::write(destination.join("config.json"), br#"{"model_type":"llama"}"#)?;
            std::fs::write(destination.join("tokenizer.json"), b"{}")?;
            std::fs::write(destination.join("model.safetensors"), vec![0u8; 64])?;
            std::fs::create_dir_all(destination.join(".cache/huggingface/download"))?;
            std::fs::write(destination.join(".cache/huggingface/download/model.lock"), b"")?;
            Ok(())
        }
    }

    struct EchoEngine;

    #[async_trait]
    impl InferenceEngine for EchoEngine {
        async fn generate(
            &self,
            prompts: &[String],
            _params: &SamplingParams,
        ) -> LifecycleResult<Vec<GenerationOutput>> {
            Ok(prompts
                .iter()
                .enumerate()
                .rev()
                .map(|(index, p)| GenerationOutput {
                    index,
                    text: p.to_uppercase(),
                    finish_reason: None,
                })
                .collect())
        }
    }

    struct EchoFactory;

    #[async_trait]
    impl EngineFactory for EchoFactory {
        fn name(&self) -> &str {
            "echo"
        }

        async fn build(
            &self,
            _model_location: &str,
            _tokenizer_dir: &Path,
            _options: &EngineOptions,
        ) -> LifecycleResult<Box<dyn InferenceEngine>> {
            Ok(Box::new(EchoEngine))
        }
    }

    fn manager(temp: &TempDir) -> ArtifactManager {
        let registry = FileSystemRegistry::open(temp.path().join("registry")).unwrap();
        ArtifactManager::new(
            Arc::new(StaticHub),
            Arc::new(registry),
            Arc::new(EchoFactory),
            LifecycleSettings {
                stage_root: temp.path().join("stage"),
                ..Default::default()
            },
        )
    }

    fn stage_entries(temp: &TempDir) -> usize {
        std::fs::read_dir(temp.path().join("stage"))
            .map(|d| d.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_store_labels_and_purge() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = ExecutionContext::new("default");

        let mut labels = Labels::new();
        labels.insert("team".to_string(), "search".to_string());
        labels.insert(LABEL_FRAMEWORK.to_string(), "spoofed".to_string());

        let artifact = manager
            .store_from_hub(&ctx, "org/tiny-model", "tiny-artifact", labels)
            .await
            .unwrap();

        assert_eq!(artifact.status(), ArtifactStatus::LocalPurged);
        assert!(artifact.is_consistent());
        assert_eq!(artifact.labels()[LABEL_FRAMEWORK], "echo");
        assert_eq!(artifact.labels()[LABEL_SOURCE], "huggingface");
        assert_eq!(artifact.labels()[LABEL_MODEL_ID], "org/tiny-model");
        assert_eq!(artifact.labels()["team"], "search");
        assert_eq!(stage_entries(&temp), 0);
    }

    #[tokio::test]
    async fn test_lookup_reconstructs_identifier() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = ExecutionContext::new("default");

        manager
            .store_from_hub(&ctx, "org/tiny-model", "tiny-artifact", Labels::new())
            .await
            .unwrap();

        let found = manager.lookup(&ctx, "tiny-artifact").await.unwrap();
        assert_eq!(found.identifier(), "org/tiny-model");
        assert_eq!(found.status(), ArtifactStatus::Stored);

        let other = ExecutionContext::new("other-project");
        assert!(matches!(
            manager.lookup(&other, "tiny-artifact").await,
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_store_rejects_bad_display_name() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = ExecutionContext::new("default");

        let result = manager
            .store_from_hub(&ctx, "org/m", "../escape", Labels::new())
            .await;
        assert!(matches!(result, Err(LifecycleError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_inference_orders_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = ExecutionContext::new("default");
        let artifact = manager
            .store_from_hub(&ctx, "org/tiny-model", "tiny-artifact", Labels::new())
            .await
            .unwrap();

        let prompts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let outputs = manager
            .run_offline_inference(
                &ctx,
                &artifact,
                &prompts,
                &SamplingParams::default(),
                &EngineOptions::new(),
            )
            .await
            .unwrap();

        let texts: Vec<_> = outputs.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
        assert_eq!(stage_entries(&temp), 0);
    }

    #[tokio::test]
    async fn test_inference_requires_prompts() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = ExecutionContext::new("default");
        let artifact =
            ModelArtifact::stored("org/m", "m", "store://artifacts/default/m#1", Labels::new());

        let result = manager
            .run_offline_inference(
                &ctx,
                &artifact,
                &[],
                &SamplingParams::default(),
                &EngineOptions::new(),
            )
            .await;
        assert!(matches!(result, Err(LifecycleError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_retrieve_tokenizer_requires_durable_artifact() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = ExecutionContext::new("default");

        let result = manager
            .retrieve_tokenizer(&ctx, &ModelArtifact::new("org/m", "m"))
            .await;
        assert!(matches!(result, Err(LifecycleError::InvalidState { .. })));
        assert_eq!(stage_entries(&temp), 0);
    }

    #[tokio::test]
    async fn test_startup_sweeps_orphans() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("stage/stage-interrupted")).unwrap();

        let _manager = manager(&temp);
        assert_eq!(stage_entries(&temp), 0);
    }

    #[tokio::test]
    async fn test_evict() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = ExecutionContext::new("default");

        for _ in 0..2 {
            manager
                .store_from_hub(&ctx, "org/tiny-model", "tiny-artifact", Labels::new())
                .await
                .unwrap();
        }

        assert_eq!(manager.evict(&ctx, "tiny-artifact").await.unwrap(), 2);
        assert!(matches!(
            manager.lookup(&ctx, "tiny-artifact").await,
            Err(LifecycleError::NotFound(_))
        ));
        assert!(matches!(
            manager.evict(&ctx, "tiny-artifact").await,
            Err(LifecycleError::NotFound(_))
        ));
    }
}
