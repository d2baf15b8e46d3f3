//! Container engine boundary
//!
//! All engine access goes through [`EngineBridge`], keyed by container or volume name.
//! The production implementation talks to a Docker-compatible daemon through bollard;
//! tests substitute in-memory or mocked bridges.

mod docker;
#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ManagedContainer;

pub use docker::BollardBridge;

/// Engine call failure, classified so callers can branch on the kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The engine had nothing to do (e.g. stopping a stopped container)
    #[error("not modified: {0}")]
    NotModified(String),

    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    /// The engine could not be talked to at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, EngineError::Timeout(_) | EngineError::Unavailable(_))
    }
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;

        match err {
            Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => EngineError::Conflict(message),
            Error::DockerResponseServerError {
                status_code: 304,
                message,
            } => EngineError::NotModified(message),
            Error::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::Api {
                status: status_code,
                message,
            },
            e @ (Error::HyperResponseError { .. }
            | Error::IOError { .. }
            | Error::RequestTimeoutError) => EngineError::Unavailable(e.to_string()),
            e => EngineError::Api {
                status: 0,
                message: e.to_string(),
            },
        }
    }
}

/// Everything the engine needs to create a node container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=value` entries
    pub env: Vec<String>,
    /// `source:target[:mode]` entries; sources are host paths or volume names
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    /// Value of an environment variable, if set
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            let (k, v) = entry.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    /// Source of the bind targeting `target`, if any
    pub fn bind_source(&self, target: &str) -> Option<&str> {
        self.binds.iter().find_map(|bind| {
            let mut parts = bind.splitn(3, ':');
            let source = parts.next()?;
            (parts.next()? == target).then_some(source)
        })
    }
}

/// Operations the lifecycle manager needs from a container engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngineBridge: Send + Sync {
    /// Check the engine is reachable; returns its version string
    async fn ping(&self) -> Result<String, EngineError>;

    async fn inspect_container(&self, name: &str) -> Result<ManagedContainer, EngineError>;

    /// Containers whose name starts with `name_prefix`; stopped ones only when `all`
    async fn list_containers(
        &self,
        name_prefix: &str,
        all: bool,
    ) -> Result<Vec<ManagedContainer>, EngineError>;

    /// Create a container; returns the engine-assigned id
    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, EngineError>;

    async fn start_container(&self, name: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<(), EngineError>;

    async fn restart_container(&self, name: &str, grace: Duration) -> Result<(), EngineError>;

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), EngineError>;

    /// Last `tail` lines of combined stdout/stderr
    async fn container_logs(&self, name: &str, tail: usize) -> Result<String, EngineError>;

    async fn inspect_volume(&self, name: &str) -> Result<(), EngineError>;

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), EngineError>;
}
