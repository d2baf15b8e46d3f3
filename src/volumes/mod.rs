//! Per-node persistent volumes
//!
//! Every node owns four named volumes derived from its container name. They are created
//! lazily on start and never removed by the manager.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{EngineBridge, EngineError};

/// Role a node volume plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeRole {
    Data,
    Vpn,
    Ssh,
    Squid,
}

impl VolumeRole {
    pub const ALL: [VolumeRole; 4] = [
        VolumeRole::Data,
        VolumeRole::Vpn,
        VolumeRole::Ssh,
        VolumeRole::Squid,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            VolumeRole::Data => "vol",
            VolumeRole::Vpn => "vpn-vol",
            VolumeRole::Ssh => "ssh-vol",
            VolumeRole::Squid => "squid-vol",
        }
    }

    /// Where the node container sees the volume
    pub fn mount_point(&self) -> &'static str {
        match self {
            VolumeRole::Data => "/mnt/data",
            VolumeRole::Vpn => "/mnt/vpn",
            VolumeRole::Ssh => "/mnt/ssh",
            VolumeRole::Squid => "/mnt/squid",
        }
    }

    /// Environment variable through which the node learns the volume name
    pub fn env_var(&self) -> &'static str {
        match self {
            VolumeRole::Data => "DATA_VOLUME_NAME",
            VolumeRole::Vpn => "VPN_VOLUME_NAME",
            VolumeRole::Ssh => "SSH_TUNNEL_VOLUME_NAME",
            VolumeRole::Squid => "SQUID_VOLUME_NAME",
        }
    }

    pub fn volume_name(&self, container_name: &str) -> String {
        format!("{}-{}", container_name, self.suffix())
    }
}

impl fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VolumeRole::Data => "data",
            VolumeRole::Vpn => "vpn",
            VolumeRole::Ssh => "ssh",
            VolumeRole::Squid => "squid",
        };
        f.write_str(name)
    }
}

/// The complete set of a node's volumes; only produced once all four exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSet {
    pub data: String,
    pub vpn: String,
    pub ssh: String,
    pub squid: String,
}

impl VolumeSet {
    /// Names derived for `container_name`, without touching the engine
    pub fn for_container(container_name: &str) -> Self {
        Self {
            data: VolumeRole::Data.volume_name(container_name),
            vpn: VolumeRole::Vpn.volume_name(container_name),
            ssh: VolumeRole::Ssh.volume_name(container_name),
            squid: VolumeRole::Squid.volume_name(container_name),
        }
    }

    pub fn name(&self, role: VolumeRole) -> &str {
        match role {
            VolumeRole::Data => &self.data,
            VolumeRole::Vpn => &self.vpn,
            VolumeRole::Ssh => &self.ssh,
            VolumeRole::Squid => &self.squid,
        }
    }

    /// (role, name) pairs in fixed role order
    pub fn iter(&self) -> impl Iterator<Item = (VolumeRole, &str)> + '_ {
        VolumeRole::ALL.into_iter().map(move |role| (role, self.name(role)))
    }
}

/// One or more volumes could not be ensured
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to provision volumes for {container_name}: {}", describe(.failures))]
pub struct ProvisioningError {
    pub container_name: String,
    pub failures: Vec<(VolumeRole, EngineError)>,
    /// Volumes this call did create before giving up; they are left in place
    pub created: Vec<String>,
}

impl ProvisioningError {
    /// Every failure was the engine being unreachable
    pub fn engine_unreachable(&self) -> bool {
        self.failures.iter().all(|(_, e)| e.is_unreachable())
    }
}

fn describe(failures: &[(VolumeRole, EngineError)]) -> String {
    failures
        .iter()
        .map(|(role, e)| format!("{} volume: {}", role, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Ensures a node's volume set exists
pub struct VolumeProvisioner {
    engine: Arc<dyn EngineBridge>,
    app_name: String,
}

impl VolumeProvisioner {
    pub fn new(engine: Arc<dyn EngineBridge>, app_name: impl Into<String>) -> Self {
        Self {
            engine,
            app_name: app_name.into(),
        }
    }

    /// Look up each volume by name and create the missing ones. Idempotent.
    ///
    /// All four roles are attempted even when one fails, so the error reports the full
    /// picture rather than the first failure.
    pub async fn ensure_volumes(&self, container_name: &str) -> Result<VolumeSet, ProvisioningError> {
        let set = VolumeSet::for_container(container_name);
        let mut failures = Vec::new();
        let mut created = Vec::new();

        for (role, name) in set.iter() {
            match self.ensure_volume(container_name, role, name).await {
                Ok(true) => created.push(name.to_string()),
                Ok(false) => {}
                Err(e) => {
                    warn!(volume = %name, role = %role, error = %e, "Volume could not be ensured");
                    failures.push((role, e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(ProvisioningError {
                container_name: container_name.to_string(),
                failures,
                created,
            });
        }

        if !created.is_empty() {
            info!(container_name = %container_name, created = ?created, "Node volumes created");
        }
        Ok(set)
    }

    /// Returns whether this call created the volume
    async fn ensure_volume(
        &self,
        container_name: &str,
        role: VolumeRole,
        name: &str,
    ) -> Result<bool, EngineError> {
        match self.engine.inspect_volume(name).await {
            Ok(()) => {
                debug!(volume = %name, "Volume exists");
                return Ok(false);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut labels = HashMap::new();
        labels.insert(format!("{}-type", self.app_name), "node".to_string());
        labels.insert(format!("{}-node", self.app_name), container_name.to_string());
        labels.insert(format!("{}-volume", self.app_name), role.to_string());

        match self.engine.create_volume(name, &labels).await {
            Ok(()) => Ok(true),
            // Created by someone else between lookup and create
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
