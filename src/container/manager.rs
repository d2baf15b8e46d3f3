//! Node container lifecycle management

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::engine::{ContainerSpec, EngineBridge, EngineError};
use crate::metrics;
use crate::models::{ManagedContainer, NodeConfig, NodeState, Scope};
use crate::paths::PathTranslator;
use crate::store::NodeConfigStore;
use crate::version::{ResolvedImage, VersionResolver};
use crate::volumes::{VolumeProvisioner, VolumeSet};

use super::error::{NodeError, RestartOutcome, StartOutcome, StopOutcome};
use super::naming::container_name;

/// Mount point of the node's configuration directory
const CONFIG_MOUNT: &str = "/mnt/config";
/// Mount point of the node's log directory
const LOG_MOUNT: &str = "/mnt/log";
/// Mount point of the private key used for at-rest encryption
const PRIVATE_KEY_MOUNT: &str = "/mnt/private_key.pem";
/// Engine socket, passed through so the node can spawn sibling task containers
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Manages node containers, keyed by (name, scope)
///
/// Holds no per-node state: every operation starts from what the engine reports now, and
/// concurrent creations by other actors are absorbed rather than treated as failures.
pub struct NodeManager {
    engine: Arc<dyn EngineBridge>,
    store: Arc<dyn NodeConfigStore>,
    resolver: VersionResolver,
    translator: PathTranslator,
    volumes: VolumeProvisioner,
    app_name: String,
    data_root: PathBuf,
    stop_grace: Duration,
}

/// Host-side sources for a node's bind mounts
#[derive(Debug, Clone)]
struct HostMounts {
    config_dir: PathBuf,
    log_dir: Option<PathBuf>,
    private_key: Option<PathBuf>,
}

impl NodeManager {
    /// Create a new node manager
    pub fn new(
        config: &AppConfig,
        engine: Arc<dyn EngineBridge>,
        store: Arc<dyn NodeConfigStore>,
        translator: PathTranslator,
    ) -> Self {
        Self {
            resolver: VersionResolver::new(config.image_repository.clone(), config.version_timeout()),
            volumes: VolumeProvisioner::new(engine.clone(), config.app_name.clone()),
            engine,
            store,
            translator,
            app_name: config.app_name.clone(),
            data_root: config.paths.data_root.clone(),
            stop_grace: config.stop_timeout(),
        }
    }

    pub fn container_name(&self, name: &str, scope: Scope) -> String {
        container_name(&self.app_name, name, scope)
    }

    pub fn store(&self) -> &dyn NodeConfigStore {
        self.store.as_ref()
    }

    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    pub fn volumes(&self) -> &VolumeProvisioner {
        &self.volumes
    }

    /// Engine version, or `None` if the engine is unreachable
    pub async fn engine_version(&self) -> Option<String> {
        self.engine.ping().await.ok()
    }

    /// Current engine view of a container; `None` when it does not exist
    async fn observe(&self, container_name: &str) -> Result<Option<ManagedContainer>, EngineError> {
        match self.engine.inspect_container(container_name).await {
            Ok(container) => Ok(Some(container)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lifecycle state of a node. Engine failures degrade to `Unknown`.
    pub async fn status(&self, name: &str, scope: Scope) -> NodeState {
        let container_name = self.container_name(name, scope);
        match self.observe(&container_name).await {
            Ok(Some(container)) => container.node_state(),
            Ok(None) => NodeState::Absent,
            Err(e) => {
                warn!(container_name = %container_name, error = %e, "Could not determine node state");
                NodeState::Unknown
            }
        }
    }

    /// Full engine view of a node's container
    pub async fn inspect(&self, name: &str, scope: Scope) -> Result<Option<ManagedContainer>, NodeError> {
        Ok(self.observe(&self.container_name(name, scope)).await?)
    }

    /// Running containers belonging to this application
    pub async fn list_running(&self) -> Result<Vec<ManagedContainer>, NodeError> {
        let prefix = format!("{}-", self.app_name);
        Ok(self.engine.list_containers(&prefix, false).await?)
    }

    /// Start a node, creating its container from scratch
    ///
    /// A stopped container is removed first, so image, environment and mounts always
    /// reflect the current configuration. Host paths are translated before the engine is
    /// touched, so an unmappable path leaves existing containers alone.
    pub async fn start(
        &self,
        config: &NodeConfig,
        explicit_image: Option<&str>,
    ) -> Result<StartOutcome, NodeError> {
        let result = self.try_start(config, explicit_image).await;
        if let Err(e) = &result {
            warn!(name = %config.name, scope = %config.scope, error = %e, "Node start failed");
            metrics::record_lifecycle("start", "error");
        }
        result
    }

    async fn try_start(
        &self,
        config: &NodeConfig,
        explicit_image: Option<&str>,
    ) -> Result<StartOutcome, NodeError> {
        let container_name = self.container_name(&config.name, config.scope);
        let started_at = Instant::now();

        let mounts = self.host_mounts(config, &container_name)?;

        match self.observe(&container_name).await? {
            Some(existing) if existing.running => {
                info!(container_name = %container_name, "Node already running");
                metrics::record_lifecycle("start", "already_running");
                return Ok(StartOutcome::AlreadyRunning {
                    container_id: Some(existing.engine_id),
                });
            }
            Some(_) => {
                debug!(container_name = %container_name, "Removing stopped container before recreating it");
                match self.engine.remove_container(&container_name, false).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    // Came back to life in between; someone else started it
                    Err(e) if e.is_conflict() => {
                        return Ok(self.converged(&container_name).await);
                    }
                    Err(e) => {
                        error!(container_name = %container_name, error = %e, "Failed to remove stopped container");
                        return Err(e.into());
                    }
                }
            }
            None => {}
        }

        let resolved = self
            .resolver
            .resolve_image(&config.server_url, &config.api_path, explicit_image)
            .await;
        let volumes = self.volumes.ensure_volumes(&container_name).await?;
        let spec = self.build_spec(config, &resolved.image, &volumes, &mounts);

        info!(
            container_name = %container_name,
            image = %resolved.image,
            "Creating node container"
        );

        let container_id = match self.engine.create_container(&container_name, &spec).await {
            Ok(id) => id,
            Err(e) if e.is_conflict() => {
                info!(container_name = %container_name, "Container created concurrently; treating as running");
                return Ok(self.converged(&container_name).await);
            }
            Err(e) => {
                error!(container_name = %container_name, error = %e, "Container creation failed");
                return Err(e.into());
            }
        };

        match self.engine.start_container(&container_name).await {
            Ok(()) | Err(EngineError::NotModified(_)) => {}
            Err(e) => {
                error!(container_name = %container_name, error = %e, "Container start failed");
                return Err(e.into());
            }
        }

        info!(container_name = %container_name, container_id = %container_id, "Node started");
        metrics::record_lifecycle("start", "started");
        metrics::record_start_duration(started_at.elapsed().as_secs_f64());

        let ResolvedImage { image, diagnostic } = resolved;
        Ok(StartOutcome::Started {
            container_id,
            image,
            diagnostic,
        })
    }

    /// Outcome for a start that lost a creation race to another actor
    async fn converged(&self, container_name: &str) -> StartOutcome {
        metrics::record_lifecycle("start", "already_running");
        let container_id = match self.observe(container_name).await {
            Ok(Some(container)) => Some(container.engine_id),
            _ => None,
        };
        StartOutcome::AlreadyRunning { container_id }
    }

    /// Translate every host path the container needs. Fails before any engine mutation.
    fn host_mounts(&self, config: &NodeConfig, container_name: &str) -> Result<HostMounts, NodeError> {
        let config_dir = self
            .translator
            .translate(&self.store.config_dir(config.scope))?;

        let log_dir = self.data_root.join("log").join(container_name);
        let log_dir = match self.translator.translate(&log_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(container_name = %container_name, error = %e, "Skipping log directory mount");
                None
            }
        };

        let private_key = match &config.encryption.private_key_path {
            Some(path) if config.encryption.enabled => Some(self.translator.translate(path)?),
            _ => None,
        };

        Ok(HostMounts {
            config_dir,
            log_dir,
            private_key,
        })
    }

    fn build_spec(
        &self,
        config: &NodeConfig,
        image: &str,
        volumes: &VolumeSet,
        mounts: &HostMounts,
    ) -> ContainerSpec {
        let mut env: Vec<String> = config
            .databases
            .iter()
            .map(|db| format!("{}_DATABASE_URI={}", db.label.to_uppercase(), db.uri))
            .collect();
        env.extend(
            volumes
                .iter()
                .map(|(role, name)| format!("{}={}", role.env_var(), name)),
        );
        env.push(format!("PRIVATE_KEY={}", PRIVATE_KEY_MOUNT));

        let mut binds = Vec::new();
        if let Some(log_dir) = &mounts.log_dir {
            binds.push(format!("{}:{}", log_dir.display(), LOG_MOUNT));
        }
        binds.push(format!("{}:{}", mounts.config_dir.display(), CONFIG_MOUNT));
        binds.extend(
            volumes
                .iter()
                .map(|(role, name)| format!("{}:{}", name, role.mount_point())),
        );
        binds.push(format!("{}:{}", DOCKER_SOCKET, DOCKER_SOCKET));
        if let Some(key) = &mounts.private_key {
            binds.push(format!("{}:{}:ro", key.display(), PRIVATE_KEY_MOUNT));
        }

        let cmd = vec![
            "vnode-local".to_string(),
            "start".to_string(),
            "-c".to_string(),
            Path::new(CONFIG_MOUNT)
                .join(format!("{}.yaml", config.name))
                .display()
                .to_string(),
            "-n".to_string(),
            config.name.clone(),
            "--dockerized".to_string(),
            config.scope.cli_flag().to_string(),
        ];

        let mut labels = HashMap::new();
        labels.insert(format!("{}-type", self.app_name), "node".to_string());
        labels.insert(format!("{}-scope", self.app_name), config.scope.to_string());
        labels.insert(format!("{}-name", self.app_name), config.name.clone());

        ContainerSpec {
            image: image.to_string(),
            cmd,
            env,
            binds,
            labels,
        }
    }

    /// Stop a node's container
    pub async fn stop(&self, name: &str, scope: Scope) -> Result<StopOutcome, NodeError> {
        let container_name = self.container_name(name, scope);

        if self.observe(&container_name).await?.is_none() {
            info!(container_name = %container_name, "Node is not running");
            metrics::record_lifecycle("stop", "not_running");
            return Ok(StopOutcome::NotRunning);
        }

        match self.engine.stop_container(&container_name, self.stop_grace).await {
            Ok(()) | Err(EngineError::NotModified(_)) => {
                info!(container_name = %container_name, "Node stopped");
                metrics::record_lifecycle("stop", "stopped");
                Ok(StopOutcome::Stopped)
            }
            Err(e) if e.is_not_found() => {
                metrics::record_lifecycle("stop", "not_running");
                Ok(StopOutcome::NotRunning)
            }
            Err(e) => {
                error!(container_name = %container_name, error = %e, "Failed to stop node");
                metrics::record_lifecycle("stop", "error");
                Err(e.into())
            }
        }
    }

    /// Restart a node's container in place
    pub async fn restart(&self, name: &str, scope: Scope) -> Result<RestartOutcome, NodeError> {
        let container_name = self.container_name(name, scope);

        if self.observe(&container_name).await?.is_none() {
            info!(container_name = %container_name, "Node is not running");
            metrics::record_lifecycle("restart", "not_running");
            return Ok(RestartOutcome::NotRunning);
        }

        match self
            .engine
            .restart_container(&container_name, self.stop_grace)
            .await
        {
            Ok(()) => {
                info!(container_name = %container_name, "Node restarted");
                metrics::record_lifecycle("restart", "restarted");
                Ok(RestartOutcome::Restarted)
            }
            Err(e) if e.is_not_found() => {
                metrics::record_lifecycle("restart", "not_running");
                Ok(RestartOutcome::NotRunning)
            }
            Err(e) => {
                error!(container_name = %container_name, error = %e, "Failed to restart node");
                metrics::record_lifecycle("restart", "error");
                Err(e.into())
            }
        }
    }

    /// Remove a node's persisted configuration. Containers and volumes are left alone.
    pub async fn delete(&self, name: &str, scope: Scope) -> Result<(), NodeError> {
        let container_name = self.container_name(name, scope);

        // An unreachable engine cannot confirm the node is down, so observe() errors propagate
        if let Some(container) = self.observe(&container_name).await? {
            if container.running {
                warn!(container_name = %container_name, "Refusing to delete configuration of running node");
                metrics::record_lifecycle("delete", "conflict");
                return Err(NodeError::Conflict(format!(
                    "node '{}' ({}) is running; stop it before deleting its configuration",
                    name, scope
                )));
            }
        }

        self.store.remove(name, scope).await?;
        metrics::record_lifecycle("delete", "deleted");
        Ok(())
    }

    /// Last `tail` lines of a node's output
    pub async fn logs(&self, name: &str, scope: Scope, tail: usize) -> Result<String, NodeError> {
        let container_name = self.container_name(name, scope);
        match self.engine.container_logs(&container_name, tail).await {
            Ok(logs) => Ok(logs),
            Err(e) if e.is_not_found() => Err(NodeError::NotRunning(container_name)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::engine::fake::FakeEngine;
    use crate::engine::MockEngineBridge;
    use crate::models::{DatabaseConfig, EncryptionSettings, LoggingSettings};
    use crate::store::{StoreError, YamlConfigStore};
    use crate::volumes::VolumeRole;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const IMAGE: &str = "harbor2.vantage6.ai/infrastructure/node:4.7.1";
    const CONTAINER: &str = "vantage6-alpha-user";

    struct Harness {
        engine: FakeEngine,
        manager: NodeManager,
        _dir: Option<TempDir>,
    }

    fn node(name: &str, scope: Scope) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            scope,
            server_url: "https://srv.example/".to_string(),
            api_key: "secret".to_string(),
            port: None,
            api_path: "/api".to_string(),
            task_dir: PathBuf::from("/tmp/vantage6"),
            databases: vec![
                DatabaseConfig {
                    label: "default".to_string(),
                    uri: "/data/alpha.csv".to_string(),
                    db_type: "csv".to_string(),
                },
                DatabaseConfig {
                    label: "omop".to_string(),
                    uri: "postgresql://db/omop".to_string(),
                    db_type: "sql".to_string(),
                },
            ],
            logging: LoggingSettings::default(),
            encryption: EncryptionSettings::default(),
        }
    }

    fn app_config() -> AppConfig {
        AppConfig {
            version_timeout_seconds: 1,
            ..AppConfig::default()
        }
    }

    /// Manager over the fake engine with a store rooted in the default config roots
    fn harness() -> Harness {
        let engine = FakeEngine::new();
        let config = app_config();
        let store = YamlConfigStore::new(&config.store);
        let translator = PathTranslator::new(&config.paths, Path::new("/home/alice"));
        let manager = NodeManager::new(&config, Arc::new(engine.clone()), Arc::new(store), translator);
        Harness {
            engine,
            manager,
            _dir: None,
        }
    }

    /// Manager whose store lives in a temp dir under the data root mapping
    fn harness_with_store_dir() -> (Harness, PathBuf) {
        let dir = TempDir::new().unwrap();
        let engine = FakeEngine::new();
        let mut config = app_config();
        // Treat the temp dir as the user config root so the store directory stays mappable
        config.paths.user_config_root = dir.path().to_path_buf();
        config.store = StoreConfig {
            user_dir: dir.path().join("node"),
            system_dir: dir.path().join("system"),
        };
        let store = YamlConfigStore::new(&config.store);
        let translator = PathTranslator::new(&config.paths, Path::new("/home/alice"));
        let manager = NodeManager::new(&config, Arc::new(engine.clone()), Arc::new(store), translator);
        let node_dir = dir.path().join("node");
        (
            Harness {
                engine,
                manager,
                _dir: Some(dir),
            },
            node_dir,
        )
    }

    #[tokio::test]
    async fn test_start_creates_container() {
        let h = harness();
        let outcome = h.manager.start(&node("alpha", Scope::User), Some(IMAGE)).await.unwrap();

        match outcome {
            StartOutcome::Started { image, diagnostic, container_id } => {
                assert_eq!(image, IMAGE);
                assert!(diagnostic.is_none());
                assert!(!container_id.is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.engine.is_running(CONTAINER), Some(true));
        assert_eq!(h.manager.status("alpha", Scope::User).await, NodeState::Running);
        assert_eq!(h.engine.created_volumes().len(), 4);
    }

    #[tokio::test]
    async fn test_container_spec_contents() {
        let h = harness();
        h.manager.start(&node("alpha", Scope::User), Some(IMAGE)).await.unwrap();
        let spec = h.engine.spec_of(CONTAINER).unwrap();

        assert_eq!(spec.image, IMAGE);
        assert_eq!(spec.env_var("DEFAULT_DATABASE_URI"), Some("/data/alpha.csv"));
        assert_eq!(spec.env_var("OMOP_DATABASE_URI"), Some("postgresql://db/omop"));
        for role in VolumeRole::ALL {
            let volume = role.volume_name(CONTAINER);
            assert_eq!(spec.env_var(role.env_var()), Some(volume.as_str()));
            assert_eq!(spec.bind_source(role.mount_point()), Some(volume.as_str()));
        }
        assert_eq!(spec.env_var("PRIVATE_KEY"), Some(PRIVATE_KEY_MOUNT));

        assert_eq!(
            spec.bind_source(CONFIG_MOUNT),
            Some("/home/alice/.config/vantage6/node")
        );
        assert_eq!(
            spec.bind_source(LOG_MOUNT),
            Some("/home/alice/vantage6-data/log/vantage6-alpha-user")
        );
        assert_eq!(spec.bind_source(DOCKER_SOCKET), Some(DOCKER_SOCKET));
        assert_eq!(spec.bind_source(PRIVATE_KEY_MOUNT), None);

        assert_eq!(
            spec.cmd,
            vec![
                "vnode-local",
                "start",
                "-c",
                "/mnt/config/alpha.yaml",
                "-n",
                "alpha",
                "--dockerized",
                "--user"
            ]
        );
        assert_eq!(spec.labels["vantage6-type"], "node");
        assert_eq!(spec.labels["vantage6-scope"], "user");
        assert_eq!(spec.labels["vantage6-name"], "alpha");
    }

    #[tokio::test]
    async fn test_system_scope_mounts_system_root() {
        let h = harness();
        h.manager.start(&node("beta", Scope::System), Some(IMAGE)).await.unwrap();
        let spec = h.engine.spec_of("vantage6-beta-system").unwrap();

        assert_eq!(
            spec.bind_source(CONFIG_MOUNT),
            Some("/home/alice/.config/vantage6-system")
        );
        assert_eq!(spec.cmd.last().map(String::as_str), Some("--system"));
    }

    #[tokio::test]
    async fn test_second_start_is_idempotent() {
        let h = harness();
        let config = node("alpha", Scope::User);
        h.manager.start(&config, Some(IMAGE)).await.unwrap();
        let containers = h.engine.created_containers();
        let volumes = h.engine.created_volumes();

        let second = h.manager.start(&config, Some(IMAGE)).await.unwrap();
        assert!(matches!(second, StartOutcome::AlreadyRunning { container_id: Some(_) }));
        assert_eq!(h.engine.created_containers(), containers);
        assert_eq!(h.engine.created_volumes(), volumes);
    }

    #[tokio::test]
    async fn test_start_recreates_stopped_container() {
        let h = harness();
        h.engine.insert_container(CONTAINER, false);

        let outcome = h.manager.start(&node("alpha", Scope::User), Some(IMAGE)).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started { .. }));
        assert_eq!(h.engine.removed_containers(), vec![CONTAINER.to_string()]);
        assert_eq!(h.engine.created_containers(), vec![CONTAINER.to_string()]);
        assert_eq!(h.engine.spec_of(CONTAINER).unwrap().image, IMAGE);
    }

    #[tokio::test]
    async fn test_concurrent_creation_converges() {
        let h = harness();
        h.engine.race_on_create();

        let outcome = h.manager.start(&node("alpha", Scope::User), Some(IMAGE)).await.unwrap();
        assert!(matches!(outcome, StartOutcome::AlreadyRunning { container_id: Some(_) }));
        assert!(h.engine.created_containers().is_empty());
        assert_eq!(h.engine.is_running(CONTAINER), Some(true));
    }

    #[tokio::test]
    async fn test_start_uses_fallback_image_when_server_unreachable() {
        let h = harness();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = node("alpha", Scope::User);
        config.server_url = format!("http://{}/", addr);

        match h.manager.start(&config, None).await.unwrap() {
            StartOutcome::Started { image, diagnostic, .. } => {
                assert_eq!(image, "harbor2.vantage6.ai/infrastructure/node:latest");
                assert!(diagnostic.is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unmappable_config_dir_aborts_before_engine_mutation() {
        let engine = FakeEngine::new();
        let mut config = app_config();
        config.store.user_dir = PathBuf::from("/opt/nodes");
        let store = YamlConfigStore::new(&config.store);
        let translator = PathTranslator::new(&config.paths, Path::new("/home/alice"));
        let manager = NodeManager::new(&config, Arc::new(engine.clone()), Arc::new(store), translator);

        let err = manager
            .start(&node("alpha", Scope::User), Some(IMAGE))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Unmappable(_)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unmappable_config_dir_keeps_stopped_container() {
        let engine = FakeEngine::new();
        engine.insert_container(CONTAINER, false);
        let mut config = app_config();
        config.store.user_dir = PathBuf::from("/opt/nodes");
        let store = YamlConfigStore::new(&config.store);
        let translator = PathTranslator::new(&config.paths, Path::new("/home/alice"));
        let manager = NodeManager::new(&config, Arc::new(engine.clone()), Arc::new(store), translator);

        let err = manager
            .start(&node("alpha", Scope::User), Some(IMAGE))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Unmappable(_)));
        assert!(engine.removed_containers().is_empty());
        assert_eq!(engine.is_running(CONTAINER), Some(false));
    }

    #[test]
    fn test_failed_start_is_counted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let h = harness();
                h.engine.set_unreachable(true);
                let err = h
                    .manager
                    .start(&node("alpha", Scope::User), Some(IMAGE))
                    .await
                    .unwrap_err();
                assert!(matches!(err, NodeError::EngineUnavailable(_)));
            });
        });

        let rendered = handle.render();
        let line = rendered
            .lines()
            .find(|l| l.starts_with("node_manager_lifecycle_total{"))
            .expect("lifecycle counter rendered");
        assert!(line.contains(r#"op="start""#));
        assert!(line.contains(r#"outcome="error""#));
        assert!(line.ends_with(" 1"));
    }

    #[tokio::test]
    async fn test_unmappable_private_key_aborts() {
        let h = harness();
        let mut config = node("alpha", Scope::User);
        config.encryption = EncryptionSettings {
            enabled: true,
            private_key_path: Some(PathBuf::from("/tmp/key.pem")),
        };

        let err = h.manager.start(&config, Some(IMAGE)).await.unwrap_err();
        assert!(matches!(err, NodeError::Unmappable(_)));
        assert!(h.engine.created_volumes().is_empty());
    }

    #[tokio::test]
    async fn test_private_key_is_mounted() {
        let h = harness();
        let mut config = node("alpha", Scope::User);
        config.encryption = EncryptionSettings {
            enabled: true,
            private_key_path: Some(PathBuf::from(
                "/root/.config/vantage6/node/private_keys/key.pem",
            )),
        };

        h.manager.start(&config, Some(IMAGE)).await.unwrap();
        let spec = h.engine.spec_of(CONTAINER).unwrap();
        assert!(spec.binds.contains(&format!(
            "/home/alice/.config/vantage6/node/private_keys/key.pem:{}:ro",
            PRIVATE_KEY_MOUNT
        )));
    }

    #[tokio::test]
    async fn test_unmappable_log_dir_is_skipped() {
        let engine = FakeEngine::new();
        let config = app_config();
        let store = YamlConfigStore::new(&config.store);
        // Only the config roots are shared with the host
        let translator = PathTranslator::from_rules(
            PathTranslator::new(&config.paths, Path::new("/home/alice")).rules()[..2].to_vec(),
        );
        let manager = NodeManager::new(&config, Arc::new(engine.clone()), Arc::new(store), translator);

        manager.start(&node("alpha", Scope::User), Some(IMAGE)).await.unwrap();
        let spec = engine.spec_of(CONTAINER).unwrap();
        assert_eq!(spec.bind_source(LOG_MOUNT), None);
        assert!(spec.bind_source(CONFIG_MOUNT).is_some());
    }

    #[tokio::test]
    async fn test_volume_failure_aborts_start() {
        let mut engine = MockEngineBridge::new();
        engine
            .expect_inspect_container()
            .returning(|name| Err(EngineError::NotFound(name.to_string())));
        engine
            .expect_inspect_volume()
            .returning(|name| Err(EngineError::NotFound(name.to_string())));
        engine.expect_create_volume().returning(|name, _| {
            if name.ends_with("-vpn-vol") {
                Err(EngineError::Api {
                    status: 500,
                    message: "driver failure".to_string(),
                })
            } else {
                Ok(())
            }
        });
        engine.expect_create_container().never();

        let config = app_config();
        let store = YamlConfigStore::new(&config.store);
        let translator = PathTranslator::new(&config.paths, Path::new("/home/alice"));
        let manager = NodeManager::new(&config, Arc::new(engine), Arc::new(store), translator);

        let err = manager
            .start(&node("alpha", Scope::User), Some(IMAGE))
            .await
            .unwrap_err();
        match err {
            NodeError::Provisioning(e) => assert_eq!(e.failures[0].0, VolumeRole::Vpn),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_with_unreachable_engine_fails() {
        let h = harness();
        h.engine.set_unreachable(true);

        let err = h
            .manager
            .start(&node("alpha", Scope::User), Some(IMAGE))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn test_status_states() {
        let h = harness();
        assert_eq!(h.manager.status("alpha", Scope::User).await, NodeState::Absent);

        h.engine.insert_container(CONTAINER, false);
        assert_eq!(h.manager.status("alpha", Scope::User).await, NodeState::Stopped);

        h.engine.set_unreachable(true);
        assert_eq!(h.manager.status("alpha", Scope::User).await, NodeState::Unknown);
    }

    #[tokio::test]
    async fn test_stop_and_restart() {
        let h = harness();
        assert_eq!(
            h.manager.stop("alpha", Scope::User).await.unwrap(),
            StopOutcome::NotRunning
        );
        assert_eq!(
            h.manager.restart("alpha", Scope::User).await.unwrap(),
            RestartOutcome::NotRunning
        );

        h.manager.start(&node("alpha", Scope::User), Some(IMAGE)).await.unwrap();
        assert_eq!(
            h.manager.stop("alpha", Scope::User).await.unwrap(),
            StopOutcome::Stopped
        );
        assert_eq!(h.manager.status("alpha", Scope::User).await, NodeState::Stopped);

        // Stopping again is absorbed
        assert_eq!(
            h.manager.stop("alpha", Scope::User).await.unwrap(),
            StopOutcome::Stopped
        );

        assert_eq!(
            h.manager.restart("alpha", Scope::User).await.unwrap(),
            RestartOutcome::Restarted
        );
        assert_eq!(h.manager.status("alpha", Scope::User).await, NodeState::Running);
    }

    #[tokio::test]
    async fn test_delete_running_node_is_rejected() {
        let (h, node_dir) = harness_with_store_dir();
        tokio::fs::create_dir_all(&node_dir).await.unwrap();
        let path = node_dir.join("alpha.yaml");
        tokio::fs::write(&path, "server_url: https://srv.example/\n").await.unwrap();

        let config = h.manager.store().get("alpha", Scope::User).await.unwrap();
        h.manager.start(&config, Some(IMAGE)).await.unwrap();

        let err = h.manager.delete("alpha", Scope::User).await.unwrap_err();
        assert!(matches!(err, NodeError::Conflict(_)));
        assert!(err.to_string().contains("stop it"));
        assert!(path.exists());

        h.manager.stop("alpha", Scope::User).await.unwrap();
        h.manager.delete("alpha", Scope::User).await.unwrap();
        assert!(!path.exists());
        // Volumes and the stopped container are left in place
        assert!(h.engine.removed_containers().is_empty());
        assert_eq!(h.engine.is_running(CONTAINER), Some(false));
    }

    #[tokio::test]
    async fn test_delete_missing_config() {
        let (h, _) = harness_with_store_dir();
        let err = h.manager.delete("ghost", Scope::User).await.unwrap_err();
        assert!(matches!(err, NodeError::Store(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_refused_when_engine_unreachable() {
        let (h, node_dir) = harness_with_store_dir();
        tokio::fs::create_dir_all(&node_dir).await.unwrap();
        let path = node_dir.join("alpha.yaml");
        tokio::fs::write(&path, "server_url: https://srv.example/\n").await.unwrap();
        h.engine.set_unreachable(true);

        let err = h.manager.delete("alpha", Scope::User).await.unwrap_err();
        assert!(matches!(err, NodeError::EngineUnavailable(_)));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_logs_and_listing() {
        let h = harness();
        assert!(matches!(
            h.manager.logs("alpha", Scope::User, 100).await,
            Err(NodeError::NotRunning(_))
        ));

        h.manager.start(&node("alpha", Scope::User), Some(IMAGE)).await.unwrap();
        h.engine.insert_container("other-app-container", true);
        h.engine.insert_container("vantage6-beta-system", false);

        let logs = h.manager.logs("alpha", Scope::User, 100).await.unwrap();
        assert!(logs.contains("line 1"));

        let running = h.manager.list_running().await.unwrap();
        let names: Vec<_> = running.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![CONTAINER]);
    }
}
