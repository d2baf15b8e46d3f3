//! Node image version probe

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::api::{ApiError, ApiQuery};
use crate::models::VersionResponse;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    pub server_url: String,
    #[serde(default = "default_api_path")]
    pub api_path: String,
}

fn default_api_path() -> String {
    "/api".to_string()
}

/// Resolve the node image a server would be started with
pub async fn resolve_version(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<VersionQuery>,
) -> Result<Json<VersionResponse>, ApiError> {
    if query.server_url.trim().is_empty() {
        return Err(ApiError::BadRequest("server_url is required".into()));
    }

    let resolved = state
        .manager
        .resolver()
        .resolve_image(&query.server_url, &query.api_path, None)
        .await;

    Ok(Json(VersionResponse {
        image: resolved.image,
        diagnostic: resolved.diagnostic,
    }))
}
