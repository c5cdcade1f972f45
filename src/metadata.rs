//! Model config summary
//!
//! Reads the `config.json` obtained by a tokenizer retrieval and keeps the
//! few fields worth logging and reporting. The full model is never needed.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Summary of a HuggingFace-style config.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ModelSummary {
    /// Model family (e.g., "llama", "mistral", "qwen2")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocab_size: Option<u32>,

    /// Context length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_embeddings: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_size: Option<u32>,
}

/// Raw config.json structure (partial)
#[derive(Debug, Deserialize)]
struct RawConfig {
    model_type: Option<String>,
    #[serde(default)]
    architectures: Vec<String>,
    vocab_size: Option<u32>,
    max_position_embeddings: Option<u32>,
    hidden_size: Option<u32>,
    // GPT-2 style names
    n_positions: Option<u32>,
    n_embd: Option<u32>,
    // Some decoder-only configs (e.g. MPT, Falcon variants)
    max_seq_len: Option<u32>,
    d_model: Option<u32>,
}

/// Parse the config.json in `dir`
///
/// Returns `None` when the file is absent or not valid JSON; a tokenizer
/// bundle without a model config is still usable.
pub fn parse_model_config(dir: &Path) -> Option<ModelSummary> {
    let content = std::fs::read_to_string(dir.join("config.json")).ok()?;
    parse_model_config_str(&content)
}

pub fn parse_model_config_str(content: &str) -> Option<ModelSummary> {
    let raw: RawConfig = serde_json::from_str(content).ok()?;

    Some(ModelSummary {
        model_type: raw.model_type,
        architectures: raw.architectures,
        vocab_size: raw.vocab_size,
        max_position_embeddings: raw
            .max_position_embeddings
            .or(raw.n_positions)
            .or(raw.max_seq_len),
        hidden_size: raw.hidden_size.or(raw.n_embd).or(raw.d_model),
    })
}
