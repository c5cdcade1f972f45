//! Model Artifacts - model artifact lifecycle manager
//!
//! Moves large models between a model hub, a versioned artifact registry and
//! local disk so they can be loaded into an inference engine, while keeping
//! bandwidth and local storage bounded.

pub mod api;
pub mod artifact;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod hub;
pub mod lock;
pub mod manager;
pub mod metadata;
pub mod metrics;
pub mod registry;
pub mod servable;
pub mod stage;

pub use artifact::{ArtifactStatus, Labels, ModelArtifact};
pub use config::ManagerConfig;
pub use context::ExecutionContext;
pub use engine::{EngineFactory, GenerationOutput, InferenceEngine, SamplingParams};
pub use error::{LifecycleError, LifecycleResult};
pub use fetcher::{AllowList, RetrievalOutcome, RetrievalResult, TOKENIZER_FILES};
pub use hub::{HfHub, ModelHub};
pub use manager::{ArtifactManager, LifecycleSettings, TokenizerBundle};
pub use registry::{ArtifactRegistry, FileSystemRegistry};
pub use servable::{LlmModelServer, ServableModel, ServingConfig};
pub use stage::LocalStage;
