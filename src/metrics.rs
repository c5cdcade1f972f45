//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record the outcome of a StoreFromHub attempt (`stored` or `failed`)
pub fn record_store(outcome: &'static str) {
    metrics::counter!("model_artifacts_store_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record per-file outcomes of a selective retrieval
pub fn record_tokenizer_files(fetched: usize, missing: usize, failed: usize) {
    for (outcome, count) in [
        ("fetched", fetched),
        ("missing_on_remote", missing),
        ("transport_failed", failed),
    ] {
        if count > 0 {
            metrics::counter!("model_artifacts_tokenizer_files_total",
                "outcome" => outcome
            )
            .increment(count as u64);
        }
    }
}

/// Record prompts completed by an engine
pub fn record_inference_prompts(count: usize) {
    metrics::counter!("model_artifacts_inference_prompts_total").increment(count as u64);
}

/// Record a local directory that could not be removed
pub fn record_cleanup_failure(kind: &'static str) {
    metrics::counter!("model_artifacts_cleanup_failures_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record registry versions removed by an eviction
pub fn record_eviction(versions: usize) {
    metrics::counter!("model_artifacts_evictions_total").increment(versions as u64);
}
