//! Node container lifecycle
//!
//! Turns a node configuration into a provisioned, idempotently (re)startable container:
//! - Deterministic container and volume naming
//! - Image selection, mount translation and volume provisioning on start
//! - Stop/restart/status/delete against live engine state

mod error;
mod manager;
mod naming;

pub use error::{NodeError, RestartOutcome, StartOutcome, StopOutcome};
pub use manager::NodeManager;
pub use naming::container_name;
