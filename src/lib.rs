//! Node manager library
//!
//! Manages the lifecycle of containerised federated-learning nodes on a single host:
//! translating the manager's internal paths to host paths, resolving the node image that
//! matches a server, provisioning per-node volumes and converging containers to the
//! requested state.

pub mod api;
pub mod config;
pub mod container;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod paths;
pub mod store;
pub mod version;
pub mod volumes;

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub manager: container::NodeManager,
}
