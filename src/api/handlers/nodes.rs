//! Node lifecycle handlers

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::warn;

use crate::api::{ApiError, ApiPath, ApiQuery};
use crate::container::{RestartOutcome, StartOutcome, StopOutcome};
use crate::models::{
    ActionResponse, LogsResponse, ManagedContainer, NodeDetail, NodeState, NodeSummary, Scope,
    StartRequest, StatusResponse,
};
use crate::store::validate_node_name;
use crate::AppState;

/// Default number of log lines returned
const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    DEFAULT_LOG_TAIL
}

fn action(name: &str, scope: Scope, outcome: &str, message: impl Into<String>) -> ActionResponse {
    ActionResponse {
        name: name.to_string(),
        scope,
        outcome: outcome.to_string(),
        message: message.into(),
        container_id: None,
        image: None,
        diagnostic: None,
    }
}

/// All configured nodes with their current state
pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NodeSummary>>, ApiError> {
    let configs = state.manager.store().list().await?;

    let mut nodes = Vec::with_capacity(configs.len());
    for config in configs {
        nodes.push(NodeSummary {
            container_name: state.manager.container_name(&config.name, config.scope),
            state: state.manager.status(&config.name, config.scope).await,
            config_path: state.manager.store().config_path(&config.name, config.scope),
            name: config.name,
            scope: config.scope,
        });
    }

    Ok(Json(nodes))
}

/// Running containers of this application, configured or not
pub async fn list_running(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ManagedContainer>>, ApiError> {
    let containers = state.manager.list_running().await?;
    Ok(Json(containers))
}

/// Configuration and container details of one node
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    ApiPath((scope, name)): ApiPath<(Scope, String)>,
) -> Result<Json<NodeDetail>, ApiError> {
    let config = state.manager.store().get(&name, scope).await?;

    let (node_state, container) = match state.manager.inspect(&name, scope).await {
        Ok(Some(container)) => (container.node_state(), Some(container)),
        Ok(None) => (NodeState::Absent, None),
        Err(e) => {
            warn!(name = %name, scope = %scope, error = %e, "Could not inspect node container");
            (NodeState::Unknown, None)
        }
    };

    Ok(Json(NodeDetail {
        container_name: state.manager.container_name(&name, scope),
        name,
        scope,
        state: node_state,
        config,
        container,
    }))
}

/// Lifecycle state of one node
pub async fn node_status(
    State(state): State<Arc<AppState>>,
    ApiPath((scope, name)): ApiPath<(Scope, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    validate_node_name(&name)?;
    let node_state = state.manager.status(&name, scope).await;

    Ok(Json(StatusResponse {
        name,
        scope,
        state: node_state,
    }))
}

/// Start a node
pub async fn start_node(
    State(state): State<Arc<AppState>>,
    ApiPath((scope, name)): ApiPath<(Scope, String)>,
    body: Option<Json<StartRequest>>,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
    let config = state.manager.store().get(&name, scope).await?;
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let outcome = state
        .manager
        .start(&config, request.image.as_deref())
        .await?;

    let response = match outcome {
        StartOutcome::Started {
            container_id,
            image,
            diagnostic,
        } => (
            StatusCode::CREATED,
            Json(ActionResponse {
                container_id: Some(container_id),
                image: Some(image),
                diagnostic,
                ..action(&name, scope, "started", "Node started")
            }),
        ),
        StartOutcome::AlreadyRunning { container_id } => (
            StatusCode::OK,
            Json(ActionResponse {
                container_id,
                ..action(&name, scope, "already_running", "Node is already running")
            }),
        ),
    };

    Ok(response)
}

/// Stop a node
pub async fn stop_node(
    State(state): State<Arc<AppState>>,
    ApiPath((scope, name)): ApiPath<(Scope, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    validate_node_name(&name)?;

    let response = match state.manager.stop(&name, scope).await? {
        StopOutcome::Stopped => action(&name, scope, "stopped", "Node stopped"),
        StopOutcome::NotRunning => action(&name, scope, "not_running", "Node is not running"),
    };

    Ok(Json(response))
}

/// Restart a node
pub async fn restart_node(
    State(state): State<Arc<AppState>>,
    ApiPath((scope, name)): ApiPath<(Scope, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    validate_node_name(&name)?;

    let response = match state.manager.restart(&name, scope).await? {
        RestartOutcome::Restarted => action(&name, scope, "restarted", "Node restarted"),
        RestartOutcome::NotRunning => action(&name, scope, "not_running", "Node is not running"),
    };

    Ok(Json(response))
}

/// Recent output of a node
pub async fn node_logs(
    State(state): State<Arc<AppState>>,
    ApiPath((scope, name)): ApiPath<(Scope, String)>,
    ApiQuery(query): ApiQuery<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    validate_node_name(&name)?;
    let logs = state.manager.logs(&name, scope, query.tail).await?;

    Ok(Json(LogsResponse { name, scope, logs }))
}

/// Delete a stopped node's configuration
pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    ApiPath((scope, name)): ApiPath<(Scope, String)>,
) -> Result<StatusCode, ApiError> {
    state.manager.delete(&name, scope).await?;
    Ok(StatusCode::NO_CONTENT)
}
