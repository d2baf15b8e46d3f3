//! Prometheus metrics export
//!
//! Provides metrics endpoint for monitoring lifecycle operations

use axum::{http::StatusCode, response::IntoResponse};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Prometheus metrics recorder
static METRICS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("node_manager_start_duration_seconds".to_string()),
            &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0],
        )
        .unwrap()
        .install_recorder()
        .unwrap()
});

/// Initialize metrics system
pub fn init_metrics() {
    // Force initialization
    Lazy::force(&METRICS_HANDLE);
}

/// Record the outcome of a lifecycle operation
pub fn record_lifecycle(operation: &'static str, outcome: &'static str) {
    counter!("node_manager_lifecycle_total", "op" => operation, "outcome" => outcome).increment(1);
}

/// Record a node image falling back to the `latest` tag
pub fn record_version_fallback() {
    counter!("node_manager_version_fallback_total").increment(1);
}

/// Record how long a start that created a container took
pub fn record_start_duration(duration_secs: f64) {
    histogram!("node_manager_start_duration_seconds").record(duration_secs);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler() -> impl IntoResponse {
    let metrics = METRICS_HANDLE.render();

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics,
    )
}
