//! Translation of the manager's internal mount points to host paths
//!
//! The manager usually runs in a container of its own, with the host's configuration and
//! data directories bind-mounted at fixed internal roots. Bind mounts requested for node
//! containers are resolved by the host's engine, so every source path has to be rewritten
//! to the host side first.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::PathConfig;

/// Path outside every declared mount root
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path {path} is not inside any mount root shared with the host")]
pub struct UnmappablePath {
    pub path: PathBuf,
}

/// Host-side root a rule maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRoot {
    UserConfig,
    SystemConfig,
    Data,
}

/// One (internal prefix → host root) rule
#[derive(Debug, Clone)]
pub struct PathRule {
    pub prefix: String,
    pub key: HostRoot,
    pub host_root: String,
}

impl PathRule {
    pub fn new(prefix: &Path, key: HostRoot, host_root: &Path) -> Self {
        Self {
            prefix: trim_trailing_slash(&prefix.to_string_lossy()).to_string(),
            key,
            host_root: trim_trailing_slash(&host_root.to_string_lossy()).to_string(),
        }
    }

    fn apply(&self, raw: &str) -> Option<PathBuf> {
        let rest = raw.strip_prefix(self.prefix.as_str())?;
        // "/database" must not match the "/data" rule
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        let joined = format!("{}{}", self.host_root, rest);
        if joined.is_empty() {
            Some(PathBuf::from("/"))
        } else {
            Some(PathBuf::from(joined))
        }
    }
}

fn trim_trailing_slash(s: &str) -> &str {
    s.trim_end_matches('/')
}

/// Ordered prefix table; the first matching rule wins
#[derive(Debug, Clone)]
pub struct PathTranslator {
    rules: Vec<PathRule>,
}

impl PathTranslator {
    /// Build the standard three rules: user config, system config, data
    ///
    /// `detected_home` is the manager's own home directory and is used only when the
    /// configuration carries no explicit host home.
    pub fn new(paths: &PathConfig, detected_home: &Path) -> Self {
        let host_home = paths
            .host_home
            .clone()
            .unwrap_or_else(|| detected_home.to_path_buf());

        Self::from_rules(vec![
            PathRule::new(
                &paths.user_config_root,
                HostRoot::UserConfig,
                &host_home.join(&paths.user_config_subpath),
            ),
            PathRule::new(
                &paths.system_config_root,
                HostRoot::SystemConfig,
                &host_home.join(&paths.system_config_subpath),
            ),
            PathRule::new(
                &paths.data_root,
                HostRoot::Data,
                &host_home.join(&paths.data_subpath),
            ),
        ])
    }

    pub fn from_rules(rules: Vec<PathRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    /// Map an internal path to the host path the engine can mount
    pub fn translate(&self, internal: &Path) -> Result<PathBuf, UnmappablePath> {
        let unmappable = || UnmappablePath {
            path: internal.to_path_buf(),
        };
        let raw = internal.to_str().ok_or_else(unmappable)?;

        self.rules
            .iter()
            .find_map(|rule| rule.apply(raw))
            .ok_or_else(unmappable)
    }

    /// Host root a path would be mapped under, if any
    pub fn root_of(&self, internal: &Path) -> Option<HostRoot> {
        let raw = internal.to_str()?;
        self.rules
            .iter()
            .find(|rule| rule.apply(raw).is_some())
            .map(|rule| rule.key)
    }
}
