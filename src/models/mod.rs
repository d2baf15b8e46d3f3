//! Data models for the node manager
//!
//! This module defines the node configuration document, the engine-side view of a node
//! container, and the request/response types of the HTTP surface.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ============================================================================
// Node configuration
// ============================================================================

/// Which configuration root a node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    User,
    System,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::System => "system",
        }
    }

    /// Flag handed to the node process so it resolves the same configuration root
    pub fn cli_flag(&self) -> &'static str {
        match self {
            Scope::User => "--user",
            Scope::System => "--system",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node configuration document, validated once when loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name, taken from the document's file stem
    #[serde(skip)]
    pub name: String,

    /// Scope, taken from the directory the document was found in
    #[serde(skip)]
    pub scope: Scope,

    /// Server the node connects to
    pub server_url: String,

    /// API key of the node's organization
    #[serde(default)]
    pub api_key: String,

    /// Server port, when not part of `server_url`
    #[serde(default)]
    pub port: Option<u16>,

    /// Path of the API below `server_url`
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Directory where the node keeps task data
    #[serde(default = "default_task_dir")]
    pub task_dir: PathBuf,

    /// Databases exposed to algorithms, in declaration order
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub encryption: EncryptionSettings,
}

/// A database the node makes available to algorithms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub label: String,
    pub uri: String,
    #[serde(rename = "type", default = "default_db_type")]
    pub db_type: String,
}

/// Node process logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_node_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

/// At-rest encryption settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EncryptionSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Private key path as seen by the manager
    #[serde(default, alias = "private_key")]
    pub private_key_path: Option<PathBuf>,
}

fn default_api_path() -> String {
    "/api".to_string()
}

fn default_task_dir() -> PathBuf {
    PathBuf::from("/tmp/vantage6")
}

fn default_db_type() -> String {
    "csv".to_string()
}

fn default_node_log_level() -> String {
    "INFO".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_node_log_level(),
            file: None,
        }
    }
}

impl NodeConfig {
    /// Check the invariants every consumer relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.server_url.trim().is_empty() {
            return Err("server_url is required".to_string());
        }

        let mut labels = HashSet::new();
        for db in &self.databases {
            if db.label.trim().is_empty() {
                return Err("database label cannot be empty".to_string());
            }
            if !labels.insert(db.label.to_uppercase()) {
                return Err(format!("duplicate database label '{}'", db.label));
            }
        }

        if self.encryption.enabled && self.encryption.private_key_path.is_none() {
            return Err("encryption is enabled but no private key is configured".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Engine-side view
// ============================================================================

/// Lifecycle state of a node as observed on the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Absent,
    Stopped,
    Running,
    /// Engine could not be reached
    Unknown,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Absent => "absent",
            NodeState::Stopped => "stopped",
            NodeState::Running => "running",
            NodeState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container as reported by the engine; fetched fresh on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ManagedContainer {
    pub name: String,
    pub engine_id: String,
    /// Raw engine status (`running`, `exited`, `created`, ...)
    pub state: String,
    pub running: bool,
    pub image: Option<String>,
    pub created_at: Option<String>,
    /// Container port (`5000/tcp`) to published host addresses
    #[serde(default)]
    pub ports: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl ManagedContainer {
    pub fn short_id(&self) -> &str {
        let end = self
            .engine_id
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.engine_id.len());
        &self.engine_id[..end]
    }

    pub fn node_state(&self) -> NodeState {
        if self.running {
            NodeState::Running
        } else {
            NodeState::Stopped
        }
    }
}

// ============================================================================
// HTTP request/response models
// ============================================================================

/// Optional body for a start request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StartRequest {
    /// Explicit image, skips the version probe
    #[serde(default)]
    pub image: Option<String>,
}

/// A configured node together with its engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub scope: Scope,
    pub container_name: String,
    pub state: NodeState,
    pub config_path: PathBuf,
}

/// Detailed view of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetail {
    pub name: String,
    pub scope: Scope,
    pub container_name: String,
    pub state: NodeState,
    pub config: NodeConfig,
    #[serde(default)]
    pub container: Option<ManagedContainer>,
}

/// Result of a lifecycle action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub name: String,
    pub scope: Scope,
    /// Machine-readable outcome (`started`, `already_running`, `not_running`, ...)
    pub outcome: String,
    pub message: String,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub name: String,
    pub scope: Scope,
    pub state: NodeState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub name: String,
    pub scope: Scope,
    pub logs: String,
}

/// Result of a version probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub image: String,
    #[serde(default)]
    pub diagnostic: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(default)]
    pub engine_version: Option<String>,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Error body returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
