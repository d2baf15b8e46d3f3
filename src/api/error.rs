//! API error handling

use axum::{
    extract::rejection::{PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::container::NodeError;
use crate::store::StoreError;
use crate::models::ErrorResponse;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Path cannot be shared with the host: {0}")]
    Unmappable(String),

    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Volume provisioning failed: {message}")]
    Provisioning {
        message: String,
        failures: Vec<String>,
    },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::Unmappable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNMAPPABLE_PATH",
                msg.clone(),
            ),
            ApiError::EngineUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ENGINE_UNAVAILABLE",
                msg.clone(),
            ),
            ApiError::Provisioning { message, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROVISIONING_FAILED",
                message.clone(),
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        let mut body = ErrorResponse::new(error_code, message);
        if let ApiError::Provisioning { failures, .. } = &self {
            body = body.with_details(json!({ "failures": failures }));
        }
        (status, Json(body)).into_response()
    }
}

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Store(StoreError::NotFound { .. }) => ApiError::NotFound(err.to_string()),
            NodeError::Store(StoreError::InvalidName(_)) => ApiError::BadRequest(err.to_string()),
            NodeError::Store(e) => {
                tracing::error!(error = %e, "Node configuration store error");
                ApiError::Internal(e.to_string())
            }
            NodeError::NotRunning(_) => ApiError::NotFound(err.to_string()),
            NodeError::Conflict(msg) => ApiError::Conflict(msg),
            NodeError::Unmappable(e) => ApiError::Unmappable(e.to_string()),
            NodeError::EngineUnavailable(msg) => ApiError::EngineUnavailable(msg),
            NodeError::Provisioning(e) if e.engine_unreachable() => {
                ApiError::EngineUnavailable(e.to_string())
            }
            NodeError::Provisioning(e) => ApiError::Provisioning {
                failures: e
                    .failures
                    .iter()
                    .map(|(role, cause)| format!("{}: {}", role, cause))
                    .collect(),
                message: e.to_string(),
            },
            NodeError::Engine(msg) => {
                tracing::error!(error = %msg, "Container engine error");
                ApiError::Internal(msg)
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        NodeError::from(err).into()
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "Internal error");
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::models::Scope;
    use crate::paths::UnmappablePath;
    use crate::volumes::{ProvisioningError, VolumeRole};
    use std::path::PathBuf;

    fn status_of(err: NodeError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_node_error_status_mapping() {
        assert_eq!(
            status_of(NodeError::Store(StoreError::NotFound {
                name: "alpha".into(),
                scope: Scope::User,
            })),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(NodeError::Store(StoreError::InvalidName("../x".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(NodeError::Conflict("running".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(NodeError::Unmappable(UnmappablePath {
                path: PathBuf::from("/opt/x"),
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(EngineError::Unavailable("refused".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(NodeError::NotRunning("vantage6-alpha-user".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(NodeError::Engine("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_provisioning_status_depends_on_cause() {
        let partial = ProvisioningError {
            container_name: "vantage6-alpha-user".into(),
            failures: vec![(
                VolumeRole::Ssh,
                EngineError::Api {
                    status: 500,
                    message: "disk full".into(),
                },
            )],
            created: vec![],
        };
        assert_eq!(
            status_of(NodeError::Provisioning(partial)),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let unreachable = ProvisioningError {
            container_name: "vantage6-alpha-user".into(),
            failures: VolumeRole::ALL
                .into_iter()
                .map(|role| (role, EngineError::Unavailable("refused".into())))
                .collect(),
            created: vec![],
        };
        assert_eq!(
            status_of(NodeError::Provisioning(unreachable)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
