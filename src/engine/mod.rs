//! Inference engine boundary
//!
//! An engine is built from a model weights location, a tokenizer directory
//! and engine options, then accepts whole prompt batches. The lifecycle
//! manager only depends on the traits here; [`ProcessEngineFactory`] runs
//! the engine as a child process.

pub mod process;

pub use process::{EngineConfig, ProcessEngineFactory};

use crate::error::{LifecycleError, LifecycleResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Engine construction options (e.g. `gpu_memory_utilization`, `max_model_len`)
pub type EngineOptions = BTreeMap<String, serde_json::Value>;

/// Text generation controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    pub max_tokens: u32,
    /// Completions per prompt
    pub n: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            top_k: None,
            max_tokens: 16,
            n: 1,
            stop: Vec::new(),
            seed: None,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> LifecycleResult<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(LifecycleError::InvalidInput(format!(
                "temperature must be >= 0 (got {})",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(LifecycleError::InvalidInput(format!(
                "top_p must be in (0, 1] (got {})",
                self.top_p
            )));
        }
        if self.top_k == Some(0) {
            return Err(LifecycleError::InvalidInput(
                "top_k must be >= 1 when set".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(LifecycleError::InvalidInput(
                "max_tokens must be >= 1".to_string(),
            ));
        }
        if self.n == 0 {
            return Err(LifecycleError::InvalidInput("n must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Completion for one prompt; `index` is the prompt's position in the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub index: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A constructed engine bound to one model and tokenizer
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Generate completions for the whole batch in one call
    async fn generate(
        &self,
        prompts: &[String],
        params: &SamplingParams,
    ) -> LifecycleResult<Vec<GenerationOutput>>;
}

/// Builds engines
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Engine name recorded in the `framework` label
    fn name(&self) -> &str;

    async fn build(
        &self,
        model_location: &str,
        tokenizer_dir: &Path,
        options: &EngineOptions,
    ) -> LifecycleResult<Box<dyn InferenceEngine>>;
}

/// Overlay per-call options on configured defaults
pub fn merge_options(defaults: &EngineOptions, extra: &EngineOptions) -> EngineOptions {
    let mut merged = defaults.clone();
    merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Put outputs in prompt order
///
/// Fails unless every index in `0..prompt_count` appears exactly once.
pub fn order_outputs(
    prompt_count: usize,
    mut outputs: Vec<GenerationOutput>,
) -> LifecycleResult<Vec<GenerationOutput>> {
    if outputs.len() != prompt_count {
        return Err(LifecycleError::Generation(format!(
            "engine returned {} outputs for {} prompts",
            outputs.len(),
            prompt_count
        )));
    }

    outputs.sort_by_key(|o| o.index);
    if let Some((position, output)) = outputs
        .iter()
        .enumerate()
        .find(|(position, output)| output.index != *position)
    {
        return Err(LifecycleError::Generation(format!(
            "engine output index {} does not match prompt position {}",
            output.index, position
        )));
    }

    Ok(outputs)
}
