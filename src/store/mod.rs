//! Node configuration documents
//!
//! One `<name>.yaml` per node in a per-scope directory. Documents are parsed into
//! [`NodeConfig`] and validated once here, so consumers never re-check them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::models::{NodeConfig, Scope};

/// Node names double as container name components
static NODE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("valid node name pattern"));

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node configuration '{name}' ({scope}) not found")]
    NotFound { name: String, scope: Scope },

    #[error("invalid node name '{0}'")]
    InvalidName(String),

    #[error("malformed node configuration {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn validate_node_name(name: &str) -> Result<(), StoreError> {
    if NODE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Read/remove access to persisted node configurations
#[async_trait]
pub trait NodeConfigStore: Send + Sync {
    /// All loadable configurations of both scopes; malformed documents are skipped
    async fn list(&self) -> Result<Vec<NodeConfig>, StoreError>;

    async fn get(&self, name: &str, scope: Scope) -> Result<NodeConfig, StoreError>;

    async fn remove(&self, name: &str, scope: Scope) -> Result<(), StoreError>;

    /// Directory holding the scope's documents, as seen by the manager
    fn config_dir(&self, scope: Scope) -> PathBuf;

    fn config_path(&self, name: &str, scope: Scope) -> PathBuf {
        self.config_dir(scope).join(format!("{}.yaml", name))
    }
}

/// File-backed store over the user and system node directories
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    user_dir: PathBuf,
    system_dir: PathBuf,
}

impl YamlConfigStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            user_dir: config.user_dir.clone(),
            system_dir: config.system_dir.clone(),
        }
    }

    async fn load(path: &Path, name: &str, scope: Scope) -> Result<NodeConfig, StoreError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config: NodeConfig =
            serde_yaml::from_str(&raw).map_err(|e| StoreError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        config.name = name.to_string();
        config.scope = scope;

        config.validate().map_err(|reason| StoreError::Malformed {
            path: path.to_path_buf(),
            reason,
        })?;

        Ok(config)
    }

    async fn list_scope(&self, scope: Scope) -> Result<Vec<NodeConfig>, StoreError> {
        let dir = self.config_dir(scope);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Node configuration directory does not exist");
                return Ok(Vec::new());
            }
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut configs = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(StoreError::Io {
                        path: dir.clone(),
                        source,
                    })
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_node_name(name).is_err() {
                warn!(path = %path.display(), "Skipping node configuration with invalid name");
                continue;
            }

            match Self::load(&path, name, scope).await {
                Ok(config) => configs.push(config),
                Err(e) => warn!(error = %e, "Skipping node configuration"),
            }
        }

        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }
}

#[async_trait]
impl NodeConfigStore for YamlConfigStore {
    async fn list(&self) -> Result<Vec<NodeConfig>, StoreError> {
        let mut configs = self.list_scope(Scope::User).await?;
        configs.extend(self.list_scope(Scope::System).await?);
        Ok(configs)
    }

    async fn get(&self, name: &str, scope: Scope) -> Result<NodeConfig, StoreError> {
        validate_node_name(name)?;
        let path = self.config_path(name, scope);

        match tokio::fs::try_exists(&path).await {
            Ok(true) => Self::load(&path, name, scope).await,
            Ok(false) => Err(StoreError::NotFound {
                name: name.to_string(),
                scope,
            }),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn remove(&self, name: &str, scope: Scope) -> Result<(), StoreError> {
        validate_node_name(name)?;
        let path = self.config_path(name, scope);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(name = %name, scope = %scope, path = %path.display(), "Node configuration removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                name: name.to_string(),
                scope,
            }),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn config_dir(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::User => self.user_dir.clone(),
            Scope::System => self.system_dir.clone(),
        }
    }
}
