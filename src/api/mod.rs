//! API module for the node manager
//!
//! Provides REST API endpoints for:
//! - Node listing and inspection
//! - Node lifecycle (start, stop, restart, delete)
//! - Node image version probing
//! - Health checks and metrics

mod error;
mod extract;
mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use error::ApiError;
pub use extract::{ApiPath, ApiQuery};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        // Prometheus metrics
        .route("/metrics", get(crate::metrics::metrics_handler))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/nodes", get(handlers::nodes::list_nodes))
        .route("/nodes/running", get(handlers::nodes::list_running))
        .route(
            "/nodes/:scope/:name",
            get(handlers::nodes::get_node).delete(handlers::nodes::delete_node),
        )
        .route("/nodes/:scope/:name/status", get(handlers::nodes::node_status))
        .route("/nodes/:scope/:name/start", post(handlers::nodes::start_node))
        .route("/nodes/:scope/:name/stop", post(handlers::nodes::stop_node))
        .route("/nodes/:scope/:name/restart", post(handlers::nodes::restart_node))
        .route("/nodes/:scope/:name/logs", get(handlers::nodes::node_logs))
        .route("/version", get(handlers::version::resolve_version))
}
