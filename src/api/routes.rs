//! API route definitions

use crate::context::ExecutionContext;
use crate::manager::ArtifactManager;
use crate::servable::ServableModel;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: ArtifactManager,
    pub server: Option<Arc<dyn ServableModel>>,
    /// Project used when a request does not name one
    pub project: String,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl AppState {
    /// Execution context for one request
    pub fn context(&self, project: Option<String>, route: &'static str) -> ExecutionContext {
        let project = project.unwrap_or_else(|| self.project.clone());
        let span = tracing::info_span!("request", project = %project, route);
        ExecutionContext::with_span(project, span)
    }
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Artifact lifecycle (no PATCH - artifacts are immutable, store a new version instead)
        .route("/artifacts", post(handlers::store_artifact))
        .route(
            "/artifacts/{name}",
            get(handlers::get_artifact).delete(handlers::evict_artifact),
        )
        .route("/artifacts/{name}/tokenizer", get(handlers::get_tokenizer))
        .route("/artifacts/{name}/infer", post(handlers::infer))
        // Servable model
        .route("/predict", post(handlers::predict))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
