//! In-memory engine used by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ContainerSpec, EngineBridge, EngineError};
use crate::models::ManagedContainer;

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, (ManagedContainer, ContainerSpec)>,
    volumes: HashSet<String>,
    created_containers: Vec<String>,
    created_volumes: Vec<String>,
    removed: Vec<String>,
    calls: Vec<String>,
    next_id: u64,
    unreachable: bool,
    /// Container that a concurrent actor creates just before our create call lands
    race_on_create: bool,
}

/// Stateful engine double that records every call
#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn race_on_create(&self) {
        self.state.lock().unwrap().race_on_create = true;
    }

    /// Seed a container as if someone created it outside the manager
    pub fn insert_container(&self, name: &str, running: bool) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let container = ManagedContainer {
            name: name.to_string(),
            engine_id: format!("{:016x}", state.next_id),
            state: if running { "running" } else { "exited" }.to_string(),
            running,
            ..Default::default()
        };
        state
            .containers
            .insert(name.to_string(), (container, ContainerSpec::default()));
    }

    pub fn insert_volume(&self, name: &str) {
        self.state.lock().unwrap().volumes.insert(name.to_string());
    }

    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|(c, _)| c.running)
    }

    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|(_, spec)| spec.clone())
    }

    pub fn created_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().created_containers.clone()
    }

    pub fn created_volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().created_volumes.clone()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn enter(&self, call: String) -> Result<std::sync::MutexGuard<'_, FakeState>, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.unreachable {
            return Err(EngineError::Unavailable("connection refused".to_string()));
        }
        Ok(state)
    }
}

fn not_found(name: &str) -> EngineError {
    EngineError::NotFound(format!("No such object: {}", name))
}

#[async_trait]
impl EngineBridge for FakeEngine {
    async fn ping(&self) -> Result<String, EngineError> {
        self.enter("ping".to_string())?;
        Ok("24.0.7-fake".to_string())
    }

    async fn inspect_container(&self, name: &str) -> Result<ManagedContainer, EngineError> {
        let state = self.enter(format!("inspect_container {}", name))?;
        state
            .containers
            .get(name)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| not_found(name))
    }

    async fn list_containers(
        &self,
        name_prefix: &str,
        all: bool,
    ) -> Result<Vec<ManagedContainer>, EngineError> {
        let state = self.enter(format!("list_containers {}", name_prefix))?;
        let mut found: Vec<ManagedContainer> = state
            .containers
            .values()
            .map(|(c, _)| c.clone())
            .filter(|c| c.name.starts_with(name_prefix) && (all || c.running))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, EngineError> {
        let mut state = self.enter(format!("create_container {}", name))?;
        if state.race_on_create {
            state.race_on_create = false;
            state.next_id += 1;
            let winner = ManagedContainer {
                name: name.to_string(),
                engine_id: format!("{:016x}", state.next_id),
                state: "running".to_string(),
                running: true,
                ..Default::default()
            };
            state
                .containers
                .insert(name.to_string(), (winner, ContainerSpec::default()));
        }
        if state.containers.contains_key(name) {
            return Err(EngineError::Conflict(format!(
                "The container name \"/{}\" is already in use",
                name
            )));
        }

        state.next_id += 1;
        let id = format!("{:016x}", state.next_id);
        let container = ManagedContainer {
            name: name.to_string(),
            engine_id: id.clone(),
            state: "created".to_string(),
            running: false,
            image: Some(spec.image.clone()),
            labels: spec.labels.clone(),
            ..Default::default()
        };
        state
            .containers
            .insert(name.to_string(), (container, spec.clone()));
        state.created_containers.push(name.to_string());
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.enter(format!("start_container {}", name))?;
        let (container, _) = state.containers.get_mut(name).ok_or_else(|| not_found(name))?;
        if container.running {
            return Err(EngineError::NotModified("already started".to_string()));
        }
        container.running = true;
        container.state = "running".to_string();
        Ok(())
    }

    async fn stop_container(&self, name: &str, _grace: Duration) -> Result<(), EngineError> {
        let mut state = self.enter(format!("stop_container {}", name))?;
        let (container, _) = state.containers.get_mut(name).ok_or_else(|| not_found(name))?;
        if !container.running {
            return Err(EngineError::NotModified("already stopped".to_string()));
        }
        container.running = false;
        container.state = "exited".to_string();
        Ok(())
    }

    async fn restart_container(&self, name: &str, _grace: Duration) -> Result<(), EngineError> {
        let mut state = self.enter(format!("restart_container {}", name))?;
        let (container, _) = state.containers.get_mut(name).ok_or_else(|| not_found(name))?;
        container.running = true;
        container.state = "running".to_string();
        Ok(())
    }

    async fn remove_container(&self, name: &str, _force: bool) -> Result<(), EngineError> {
        let mut state = self.enter(format!("remove_container {}", name))?;
        state.containers.remove(name).ok_or_else(|| not_found(name))?;
        state.removed.push(name.to_string());
        Ok(())
    }

    async fn container_logs(&self, name: &str, tail: usize) -> Result<String, EngineError> {
        let state = self.enter(format!("container_logs {}", name))?;
        if !state.containers.contains_key(name) {
            return Err(not_found(name));
        }
        Ok((1..=tail.min(3))
            .map(|i| format!("{} line {}\n", name, i))
            .collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<(), EngineError> {
        let state = self.enter(format!("inspect_volume {}", name))?;
        if state.volumes.contains(name) {
            Ok(())
        } else {
            Err(not_found(name))
        }
    }

    async fn create_volume(
        &self,
        name: &str,
        _labels: &HashMap<String, String>,
    ) -> Result<(), EngineError> {
        let mut state = self.enter(format!("create_volume {}", name))?;
        if !state.volumes.insert(name.to_string()) {
            return Err(EngineError::Conflict(format!("volume {} exists", name)));
        }
        state.created_volumes.push(name.to_string());
        Ok(())
    }
}
