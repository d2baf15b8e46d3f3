//! Configuration module for the node manager
//!
//! Supports configuration via:
//! - YAML/TOML config files
//! - Environment variables (with NODE_MANAGER_ prefix)
//! - A plain `HOST_HOME` variable when the manager runs inside its own container

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for the manager's own JSON log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Application name used as container and volume name prefix
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Registry/repository the node image is pulled from (without tag)
    #[serde(default = "default_image_repository")]
    pub image_repository: String,

    /// Timeout for the server version probe
    #[serde(default = "default_version_timeout")]
    pub version_timeout_seconds: u64,

    /// Upper bound for every individual container engine call
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_seconds: u64,

    /// Grace period handed to the engine on stop/restart
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,

    /// Docker socket path (local defaults when unset)
    #[serde(default)]
    pub engine_socket: Option<String>,

    /// Mount roots and their host counterparts
    #[serde(default)]
    pub paths: PathConfig,

    /// Node configuration directories
    #[serde(default)]
    pub store: StoreConfig,
}

/// Internal mount roots of the manager and the host directories they come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// User-scope configuration root inside the manager container
    #[serde(default = "default_user_config_root")]
    pub user_config_root: PathBuf,

    /// System-scope configuration root inside the manager container
    #[serde(default = "default_system_config_root")]
    pub system_config_root: PathBuf,

    /// Data root inside the manager container
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Home directory on the docker host; falls back to the manager's own home
    #[serde(default)]
    pub host_home: Option<PathBuf>,

    /// Host subpath (relative to host home) backing the user config root
    #[serde(default = "default_user_config_subpath")]
    pub user_config_subpath: PathBuf,

    /// Host subpath backing the system config root
    #[serde(default = "default_system_config_subpath")]
    pub system_config_subpath: PathBuf,

    /// Host subpath backing the data root
    #[serde(default = "default_data_subpath")]
    pub data_subpath: PathBuf,
}

/// Where node configuration documents live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding user-scope `<name>.yaml` files
    #[serde(default = "default_user_node_dir")]
    pub user_dir: PathBuf,

    /// Directory holding system-scope `<name>.yaml` files
    #[serde(default = "default_system_node_dir")]
    pub system_dir: PathBuf,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/node-manager")
}

fn default_app_name() -> String {
    "vantage6".to_string()
}

fn default_image_repository() -> String {
    "harbor2.vantage6.ai/infrastructure/node".to_string()
}

fn default_version_timeout() -> u64 {
    3
}

fn default_engine_timeout() -> u64 {
    30
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_user_config_root() -> PathBuf {
    PathBuf::from("/root/.config/vantage6")
}

fn default_system_config_root() -> PathBuf {
    PathBuf::from("/etc/vantage6/node")
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/data")
}

fn default_user_config_subpath() -> PathBuf {
    PathBuf::from(".config/vantage6")
}

fn default_system_config_subpath() -> PathBuf {
    PathBuf::from(".config/vantage6-system")
}

fn default_data_subpath() -> PathBuf {
    PathBuf::from("vantage6-data")
}

fn default_user_node_dir() -> PathBuf {
    default_user_config_root().join("node")
}

fn default_system_node_dir() -> PathBuf {
    default_system_config_root()
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            user_config_root: default_user_config_root(),
            system_config_root: default_system_config_root(),
            data_root: default_data_root(),
            host_home: None,
            user_config_subpath: default_user_config_subpath(),
            system_config_subpath: default_system_config_subpath(),
            data_subpath: default_data_subpath(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            user_dir: default_user_node_dir(),
            system_dir: default_system_node_dir(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            app_name: default_app_name(),
            image_repository: default_image_repository(),
            version_timeout_seconds: default_version_timeout(),
            engine_timeout_seconds: default_engine_timeout(),
            stop_timeout_seconds: default_stop_timeout(),
            engine_socket: None,
            paths: PathConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Load from config file if present
            .add_source(config::File::with_name("config/node-manager").required(false))
            .add_source(config::File::with_name("/etc/node-manager/config").required(false))
            // Override with environment variables (NODE_MANAGER_ prefix)
            .add_source(
                config::Environment::with_prefix("NODE_MANAGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // The compose file for the containerised manager passes the host home this way
        if app_config.paths.host_home.is_none() {
            app_config.paths.host_home = std::env::var_os("HOST_HOME")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from);
        }

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.app_name.trim().is_empty() {
            anyhow::bail!("Application name cannot be empty");
        }

        if self.image_repository.trim().is_empty() {
            anyhow::bail!("Image repository cannot be empty");
        }

        if self.version_timeout_seconds == 0 || self.engine_timeout_seconds == 0 {
            anyhow::bail!("Timeouts must be at least one second");
        }

        for root in [
            &self.paths.user_config_root,
            &self.paths.system_config_root,
            &self.paths.data_root,
        ] {
            if !root.is_absolute() {
                anyhow::bail!("Mount root {} must be an absolute path", root.display());
            }
        }

        Ok(())
    }

    pub fn version_timeout(&self) -> Duration {
        Duration::from_secs(self.version_timeout_seconds)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_seconds)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}
