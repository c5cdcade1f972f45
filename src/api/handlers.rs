//! API request handlers

use super::models::{
    ArtifactInfo, EvictResponse, HealthResponse, InferRequest, InferResponse, ProjectQuery,
    StoreArtifactRequest, TokenizerReport,
};
use super::routes::AppState;
use crate::error::LifecycleError;
use crate::servable::{PredictRequest, PredictResponse};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

/// GET /health - Service health check
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            engine: state.manager.engine_name().to_string(),
            serving: state.server.as_ref().map(|s| s.name().to_string()),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// POST /artifacts - Store a hub model in the registry
///
/// Responds once the artifact is durable and the local copy is purged.
pub async fn store_artifact(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
    Json(req): Json<StoreArtifactRequest>,
) -> Result<(StatusCode, Json<ArtifactInfo>), LifecycleError> {
    let ctx = state.context(query.project, "store");

    let artifact = state
        .manager
        .store_from_hub(&ctx, &req.model_id, &req.display_name, req.labels)
        .await?;

    Ok((StatusCode::CREATED, Json(ArtifactInfo::from(&artifact))))
}

/// GET /artifacts/{name} - Latest stored version
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<ArtifactInfo>, LifecycleError> {
    let ctx = state.context(query.project, "lookup");
    let artifact = state.manager.lookup(&ctx, &name).await?;

    Ok(Json(ArtifactInfo::from(&artifact)))
}

/// DELETE /artifacts/{name} - Evict all versions
pub async fn evict_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<EvictResponse>, LifecycleError> {
    let ctx = state.context(query.project, "evict");
    let versions_removed = state.manager.evict(&ctx, &name).await?;

    Ok(Json(EvictResponse {
        display_name: name,
        versions_removed,
    }))
}

/// GET /artifacts/{name}/tokenizer - Selective retrieval report
pub async fn get_tokenizer(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<TokenizerReport>, LifecycleError> {
    let ctx = state.context(query.project, "tokenizer");
    let artifact = state.manager.lookup(&ctx, &name).await?;

    let bundle = state.manager.retrieve_tokenizer(&ctx, &artifact).await?;
    let model = bundle.summary().cloned();
    let result = bundle.close().await;

    Ok(Json(TokenizerReport::new(&name, &result, model)))
}

/// POST /artifacts/{name}/infer - Run a prompt batch
pub async fn infer(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ProjectQuery>,
    Json(req): Json<InferRequest>,
) -> Result<Json<InferResponse>, LifecycleError> {
    let ctx = state.context(query.project, "infer");
    let artifact = state.manager.lookup(&ctx, &name).await?;

    let outputs = state
        .manager
        .run_offline_inference(
            &ctx,
            &artifact,
            &req.prompts,
            &req.sampling_params,
            &req.engine_options,
        )
        .await?;

    Ok(Json(InferResponse {
        display_name: name,
        outputs,
    }))
}

/// POST /predict - Predict with the configured servable model
pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, LifecycleError> {
    let server = state
        .server
        .clone()
        .ok_or_else(|| LifecycleError::NotFound("no servable model configured".to_string()))?;

    let ctx = state.context(None, "predict");
    let response = server.predict(&ctx, req).await?;

    Ok(Json(response))
}
