//! API request and response models

use crate::artifact::{ArtifactStatus, Labels, ModelArtifact};
use crate::engine::{EngineOptions, GenerationOutput, SamplingParams};
use crate::fetcher::{RetrievalOutcome, RetrievalResult};
use crate::metadata::ModelSummary;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine: String,
    /// Name of the configured servable model, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Optional project override on artifact routes
#[derive(Debug, Default, Deserialize)]
pub struct ProjectQuery {
    pub project: Option<String>,
}

/// Request to store a hub model in the registry
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreArtifactRequest {
    /// Hub identifier, e.g. `org/tiny-model`
    pub model_id: String,
    pub display_name: String,
    #[serde(default)]
    pub labels: Labels,
}

/// Artifact information response
#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub model_id: String,
    pub display_name: String,
    pub status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
    pub labels: Labels,
}

impl From<&ModelArtifact> for ArtifactInfo {
    fn from(artifact: &ModelArtifact) -> Self {
        Self {
            model_id: artifact.identifier().to_string(),
            display_name: artifact.display_name().to_string(),
            status: artifact.status(),
            remote_uri: artifact.remote_uri().map(str::to_string),
            labels: artifact.labels().clone(),
        }
    }
}

/// Eviction response
#[derive(Debug, Serialize, Deserialize)]
pub struct EvictResponse {
    pub display_name: String,
    pub versions_removed: usize,
}

/// Outcome of one allow-listed tokenizer file
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenizerFileReport {
    pub filename: String,
    #[serde(flatten)]
    pub outcome: RetrievalOutcome,
}

/// Tokenizer retrieval report
///
/// The retrieved files are removed before this is returned.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenizerReport {
    pub display_name: String,
    pub files: Vec<TokenizerFileReport>,
    pub skipped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSummary>,
}

impl TokenizerReport {
    pub fn new(display_name: &str, result: &RetrievalResult, model: Option<ModelSummary>) -> Self {
        Self {
            display_name: display_name.to_string(),
            files: result
                .entries()
                .map(|e| TokenizerFileReport {
                    filename: e.filename.clone(),
                    outcome: e.outcome.clone(),
                })
                .collect(),
            skipped: result.skipped().to_vec(),
            model,
        }
    }
}

/// Request to run a prompt batch against a stored artifact
#[derive(Debug, Serialize, Deserialize)]
pub struct InferRequest {
    pub prompts: Vec<String>,
    #[serde(default)]
    pub sampling_params: SamplingParams,
    #[serde(default)]
    pub engine_options: EngineOptions,
}

/// Outputs in prompt order
#[derive(Debug, Serialize, Deserialize)]
pub struct InferResponse {
    pub display_name: String,
    pub outputs: Vec<GenerationOutput>,
}
