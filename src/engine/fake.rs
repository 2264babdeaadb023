//! In-memory container engine for testing.
//!
//! Keeps containers, images and volumes in a map and records every mutating
//! call, so controller tests can assert on what would have been sent to a
//! real engine.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Protocol;

use super::{
    ContainerEngine, ContainerSpec, EngineError, ExecOptions, Instance, InstanceStatus,
    LABEL_ENV, LABEL_MANAGED, LABEL_PERSIST,
};

#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub spec: ContainerSpec,
    pub status: InstanceStatus,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    images: HashSet<String>,
    volumes: HashMap<String, HashMap<String, String>>,
    calls: Vec<String>,
}

/// A fake engine; clones share state.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
    unreachable: bool,
    never_runs: bool,
    stop_fails: bool,
    exit_code: i64,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine refuses every call.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Started containers stay in `creating` forever.
    pub fn never_runs(mut self) -> Self {
        self.never_runs = true;
        self
    }

    /// `stop` fails with an operation error.
    pub fn stop_fails(mut self) -> Self {
        self.stop_fails = true;
        self
    }

    /// Exit code returned by `exec` and `attach_shell`.
    pub fn exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    /// Inserts a container directly, bypassing `create`.
    pub fn with_container(self, name: &str, status: InstanceStatus) -> Self {
        let spec = ContainerSpec {
            name: name.to_string(),
            image: "external:latest".to_string(),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(name.to_string(), FakeContainer { spec, status });
        self
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().volumes.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) -> Result<(), EngineError> {
        if self.unreachable {
            return Err(EngineError::unavailable("connection refused"));
        }
        self.state.lock().unwrap().calls.push(call);
        Ok(())
    }

    fn to_instance(name: &str, container: &FakeContainer) -> Instance {
        Instance {
            id: format!("id-{name}"),
            name: name.to_string(),
            status: container.status,
            created_at: None,
            host_ports: container.spec.ports.iter().map(|p| p.host_port).collect(),
            persist_data: container
                .spec
                .labels
                .get(LABEL_PERSIST)
                .is_some_and(|v| v == "true"),
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.record("ping".to_string())
    }

    async fn inspect(&self, name: &str) -> Result<Option<Instance>, EngineError> {
        self.record(format!("inspect {name}"))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .get(name)
            .map(|c| Self::to_instance(name, c)))
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<Instance>, EngineError> {
        Ok(self.inspect(name).await?.into_iter().collect())
    }

    async fn list_managed(&self) -> Result<Vec<Instance>, EngineError> {
        self.record("list".to_string())?;
        let state = self.state.lock().unwrap();
        let mut found: Vec<Instance> = state
            .containers
            .iter()
            .filter(|(_, c)| c.spec.labels.contains_key(LABEL_MANAGED))
            .map(|(n, c)| Self::to_instance(n, c))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn published_ports(&self) -> Result<Vec<(u16, Protocol)>, EngineError> {
        self.record("ports".to_string())?;
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .values()
            .filter(|c| c.status == InstanceStatus::Running)
            .flat_map(|c| c.spec.ports.iter().map(|p| (p.host_port, p.protocol)))
            .collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        self.record(format!("image_exists {image}"))?;
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        self.record(format!("pull {image}"))?;
        if image.starts_with("missing") {
            return Err(EngineError::image_not_found(image));
        }
        self.state.lock().unwrap().images.insert(image.to_string());
        Ok(())
    }

    async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        _build_args: &HashMap<String, String>,
    ) -> Result<(), EngineError> {
        self.record(format!("build {tag} {}", context.display()))?;
        self.state.lock().unwrap().images.insert(tag.to_string());
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), EngineError> {
        self.record(format!("create_volume {name}"))?;
        self.state
            .lock()
            .unwrap()
            .volumes
            .insert(name.to_string(), labels.clone());
        Ok(())
    }

    async fn list_volumes(&self, env_name: &str) -> Result<Vec<String>, EngineError> {
        self.record(format!("list_volumes {env_name}"))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .volumes
            .iter()
            .filter(|(_, labels)| labels.get(LABEL_ENV).is_some_and(|v| v == env_name))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), EngineError> {
        self.record(format!("remove_volume {name}"))?;
        self.state.lock().unwrap().volumes.remove(name);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.record(format!("create {}", spec.name))?;
        let mut state = self.state.lock().unwrap();
        if !state.images.contains(&spec.image) {
            return Err(EngineError::image_not_found(&spec.image));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(EngineError::failed("create container", "name in use"));
        }
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                status: InstanceStatus::Creating,
            },
        );
        Ok(format!("id-{}", spec.name))
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        self.record(format!("start {name}"))?;
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::not_found(name))?;
        if !self.never_runs {
            container.status = InstanceStatus::Running;
        }
        Ok(())
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError> {
        self.record(format!("stop {name} {}", grace.as_secs()))?;
        if self.stop_fails {
            return Err(EngineError::failed("stop container", "timeout"));
        }
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::not_found(name))?;
        container.status = InstanceStatus::Stopped;
        Ok(())
    }

    async fn remove(&self, name: &str, remove_volumes: bool) -> Result<(), EngineError> {
        self.record(format!("remove {name} v={remove_volumes}"))?;
        self.state
            .lock()
            .unwrap()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(name))
    }

    async fn exec(
        &self,
        name: &str,
        command: &str,
        _options: &ExecOptions,
        stdout: &mut (dyn Write + Send),
        _stderr: &mut (dyn Write + Send),
    ) -> Result<i64, EngineError> {
        self.record(format!("exec {name} {command}"))?;
        let env = self
            .container(name)
            .map(|c| c.spec.env)
            .unwrap_or_default();

        // Understands `echo $VAR`, enough to observe injected variables.
        if let Some(var) = command.strip_prefix("echo $") {
            let prefix = format!("{var}=");
            let value = env
                .iter()
                .rev()
                .find_map(|e| e.strip_prefix(&prefix))
                .unwrap_or("");
            writeln!(stdout, "{value}").map_err(|e| EngineError::failed("exec", e.to_string()))?;
        }
        Ok(self.exit_code)
    }

    async fn attach_shell(&self, name: &str, _options: &ExecOptions) -> Result<i64, EngineError> {
        self.record(format!("attach {name}"))?;
        Ok(self.exit_code)
    }
}
