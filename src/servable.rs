//! Servable model capability
//!
//! A [`ServableModel`] can be loaded and asked for predictions.
//! [`LlmModelServer`] implements it over an [`ArtifactManager`] with a fixed
//! [`ServingConfig`]; nothing about the served model changes after
//! construction.

use crate::artifact::{Labels, ModelArtifact};
use crate::context::ExecutionContext;
use crate::engine::{EngineOptions, GenerationOutput, SamplingParams};
use crate::error::{LifecycleError, LifecycleResult};
use crate::manager::ArtifactManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a server serves
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServingConfig {
    /// Server name reported in responses
    pub name: String,
    /// Hub identifier, used when the artifact is not yet stored
    pub model_id: String,
    /// Registry key of the artifact
    pub display_name: String,
    /// Extra labels applied if the artifact has to be stored
    #[serde(default)]
    pub labels: Labels,
}

/// Prediction input
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictRequest {
    pub prompts: Vec<String>,
    #[serde(default)]
    pub sampling_params: SamplingParams,
    /// Per-call engine options
    #[serde(default)]
    pub engine_options: EngineOptions,
}

/// Prediction output, one entry per prompt in prompt order
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictResponse {
    pub model_name: String,
    pub outputs: Vec<GenerationOutput>,
}

#[async_trait]
pub trait ServableModel: Send + Sync {
    fn name(&self) -> &str;

    /// Make the model available; returns the durable artifact
    async fn load(&self, ctx: &ExecutionContext) -> LifecycleResult<ModelArtifact>;

    async fn predict(
        &self,
        ctx: &ExecutionContext,
        request: PredictRequest,
    ) -> LifecycleResult<PredictResponse>;
}

/// Serves one language model stored in the artifact registry
#[derive(Clone)]
pub struct LlmModelServer {
    manager: ArtifactManager,
    config: ServingConfig,
}

impl LlmModelServer {
    pub fn new(manager: ArtifactManager, config: ServingConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }
}

#[async_trait]
impl ServableModel for LlmModelServer {
    fn name(&self) -> &str {
        &self.config.name
    }

    /// Lookup, storing from the hub when the artifact is absent
    async fn load(&self, ctx: &ExecutionContext) -> LifecycleResult<ModelArtifact> {
        match self.manager.lookup(ctx, &self.config.display_name).await {
            Ok(artifact) => {
                tracing::info!(server = %self.config.name, display_name = %self.config.display_name, "Model already stored");
                Ok(artifact)
            }
            Err(LifecycleError::NotFound(_)) => {
                tracing::info!(
                    server = %self.config.name,
                    model_id = %self.config.model_id,
                    "Model not in registry, storing from hub"
                );
                self.manager
                    .store_from_hub(
                        ctx,
                        &self.config.model_id,
                        &self.config.display_name,
                        self.config.labels.clone(),
                    )
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn predict(
        &self,
        ctx: &ExecutionContext,
        request: PredictRequest,
    ) -> LifecycleResult<PredictResponse> {
        let artifact = self.manager.lookup(ctx, &self.config.display_name).await?;
        let outputs = self
            .manager
            .run_offline_inference(
                ctx,
                &artifact,
                &request.prompts,
                &request.sampling_params,
                &request.engine_options,
            )
            .await?;

        Ok(PredictResponse {
            model_name: self.config.name.clone(),
            outputs,
        })
    }
}
