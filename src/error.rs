//! Error types for lifecycle operations and their API responses

use crate::artifact::{ArtifactStatus, ModelArtifact};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors surfaced by the artifact lifecycle manager
///
/// Missing allow-listed files are reported as data in a retrieval result and
/// cleanup failures are only logged, so neither has a variant here.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Hub or registry unreachable, or a remote file is missing
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("artifact '{name}' is {found}, expected {expected}")]
    InvalidState {
        name: String,
        expected: ArtifactStatus,
        found: ArtifactStatus,
    },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ArtifactStatus,
        to: ArtifactStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("engine construction failed: {0}")]
    EngineConstruction(String),

    #[error("generation failed: {0}")]
    Generation(String),

    /// A store attempt failed; `artifact` is in `Failed` status
    #[error("failed to store '{}': {source}", artifact.display_name())]
    StoreFailed {
        artifact: Box<ModelArtifact>,
        #[source]
        source: Box<LifecycleError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    /// The failed artifact carried by a store failure
    pub fn failed_artifact(&self) -> Option<&ModelArtifact> {
        match self {
            Self::StoreFailed { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) | Self::InvalidState { .. } => StatusCode::BAD_REQUEST,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::StoreFailed { source, .. } => source.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
