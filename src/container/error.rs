//! Lifecycle outcomes and errors

use thiserror::Error;

use crate::engine::EngineError;
use crate::paths::UnmappablePath;
use crate::store::StoreError;
use crate::volumes::ProvisioningError;

/// Successful result of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started {
        container_id: String,
        image: String,
        /// Why the fallback image was used, if it was
        diagnostic: Option<String>,
    },
    /// The container was already running, or another actor created it concurrently
    AlreadyRunning { container_id: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Restarted,
    NotRunning,
}

/// Lifecycle failures; benign no-ops are outcomes, not errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("{0}")]
    Conflict(String),

    #[error("node container {0} is not running")]
    NotRunning(String),

    #[error(transparent)]
    Unmappable(#[from] UnmappablePath),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

impl From<EngineError> for NodeError {
    fn from(err: EngineError) -> Self {
        if err.is_unreachable() {
            NodeError::EngineUnavailable(err.to_string())
        } else {
            NodeError::Engine(err.to_string())
        }
    }
}
