//! bollard-backed engine bridge
//!
//! Every call is bounded by the configured engine timeout; expiry surfaces as
//! [`EngineError::Timeout`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::models::{ContainerInspectResponse, ContainerSummary, HostConfig};
use bollard::volume::CreateVolumeOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use tracing::debug;

use super::{ContainerSpec, EngineBridge, EngineError};
use crate::models::ManagedContainer;

/// Engine bridge over a bollard Docker client
#[derive(Clone)]
pub struct BollardBridge {
    docker: Docker,
    timeout: Duration,
}

impl BollardBridge {
    /// Connect to the daemon at `socket`, or the local defaults when unset
    pub fn connect(socket: Option<&str>, timeout: Duration) -> Result<Self, EngineError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(path, timeout.as_secs(), API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?,
        };

        Ok(Self::new(docker, timeout))
    }

    pub fn new(docker: Docker, timeout: Duration) -> Self {
        Self { docker, timeout }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, bollard::errors::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl EngineBridge for BollardBridge {
    async fn ping(&self) -> Result<String, EngineError> {
        let version = self.bounded(self.docker.version()).await?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn inspect_container(&self, name: &str) -> Result<ManagedContainer, EngineError> {
        let info = self
            .bounded(self.docker.inspect_container(name, None))
            .await?;
        Ok(from_inspect(name, info))
    }

    async fn list_containers(
        &self,
        name_prefix: &str,
        all: bool,
    ) -> Result<Vec<ManagedContainer>, EngineError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_prefix.to_string()]);
        let options = ListContainersOptions::<String> {
            all,
            filters,
            ..Default::default()
        };

        let summaries = self
            .bounded(self.docker.list_containers(Some(options)))
            .await?;

        // The engine's name filter matches substrings; keep true prefix matches only
        Ok(summaries
            .into_iter()
            .map(from_summary)
            .filter(|c| c.name.starts_with(name_prefix))
            .collect())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, EngineError> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        debug!(container_name = %name, image = %spec.image, "Creating container");
        let response = self
            .bounded(self.docker.create_container(Some(options), config))
            .await?;
        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        self.bounded(
            self.docker
                .start_container(name, None::<StartContainerOptions<String>>),
        )
        .await
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<(), EngineError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.bounded(self.docker.stop_container(name, Some(options)))
            .await
    }

    async fn restart_container(&self, name: &str, grace: Duration) -> Result<(), EngineError> {
        let options = RestartContainerOptions {
            t: grace.as_secs() as isize,
        };
        self.bounded(self.docker.restart_container(name, Some(options)))
            .await
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.bounded(self.docker.remove_container(name, Some(options)))
            .await
    }

    async fn container_logs(&self, name: &str, tail: usize) -> Result<String, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let collect = async {
            let mut stream = Box::pin(self.docker.logs(name, Some(options)));
            let mut output = String::new();
            while let Some(chunk) = stream.next().await {
                output.push_str(&String::from_utf8_lossy(&chunk?.into_bytes()));
            }
            Ok::<_, bollard::errors::Error>(output)
        };

        self.bounded(collect).await
    }

    async fn inspect_volume(&self, name: &str) -> Result<(), EngineError> {
        self.bounded(self.docker.inspect_volume(name))
            .await
            .map(|_| ())
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), EngineError> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            driver: "local".to_string(),
            labels: labels.clone(),
            ..Default::default()
        };
        self.bounded(self.docker.create_volume(options))
            .await
            .map(|_| ())
    }
}

fn from_inspect(requested: &str, info: ContainerInspectResponse) -> ManagedContainer {
    let state = info.state.as_ref();
    let status = state
        .and_then(|s| s.status.as_ref())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let running = state.and_then(|s| s.running).unwrap_or(false);

    let (image, labels) = match info.config {
        Some(config) => (config.image, config.labels.unwrap_or_default()),
        None => (None, HashMap::new()),
    };

    let ports = info
        .network_settings
        .and_then(|n| n.ports)
        .map(|ports| {
            ports
                .into_iter()
                .map(|(port, bindings)| {
                    let published = bindings
                        .unwrap_or_default()
                        .into_iter()
                        .map(|b| {
                            format!(
                                "{}:{}",
                                b.host_ip.unwrap_or_default(),
                                b.host_port.unwrap_or_default()
                            )
                        })
                        .collect();
                    (port, published)
                })
                .collect()
        })
        .unwrap_or_default();

    ManagedContainer {
        name: info
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| requested.to_string()),
        engine_id: info.id.unwrap_or_default(),
        state: status,
        running,
        image,
        created_at: info.created,
        ports,
        labels,
    }
}

fn from_summary(summary: ContainerSummary) -> ManagedContainer {
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let state = summary.state.unwrap_or_else(|| "unknown".to_string());

    let mut ports: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for port in summary.ports.unwrap_or_default() {
        let key = match port.typ {
            Some(typ) => format!("{}/{}", port.private_port, typ),
            None => port.private_port.to_string(),
        };
        let entry = ports.entry(key).or_default();
        if let Some(public) = port.public_port {
            entry.push(format!("{}:{}", port.ip.unwrap_or_default(), public));
        }
    }

    ManagedContainer {
        name,
        engine_id: summary.id.unwrap_or_default(),
        running: state == "running",
        state,
        image: summary.image,
        created_at: summary
            .created
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.to_rfc3339()),
        ports,
        labels: summary.labels.unwrap_or_default(),
    }
}
