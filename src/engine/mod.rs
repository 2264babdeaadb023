//! Container engine boundary.
//!
//! Every stateful operation (create, start, stop, remove, exec, inspect) goes
//! through [`ContainerEngine`]. The Docker implementation speaks the engine
//! API over the local socket; tests substitute an in-memory fake. Instance
//! state is always read back from the engine and never cached.

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod fake;

pub(crate) use docker::DockerEngine;
pub(crate) use error::EngineError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::config::{PortMapping, Protocol};

/// Label marking containers created by agentbox.
pub(crate) const LABEL_MANAGED: &str = "agentbox.managed";
/// Label recording whether the environment's data volume outlives `down`.
pub(crate) const LABEL_PERSIST: &str = "agentbox.persist";
/// Label tying a named volume to its environment.
pub(crate) const LABEL_ENV: &str = "agentbox.env";

/// Observed status of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum InstanceStatus {
    /// Created but not started yet.
    Creating,
    /// Main process is running.
    Running,
    /// Exited, paused, dead or being removed.
    Stopped,
    /// No such container.
    Absent,
}

impl InstanceStatus {
    /// Maps an engine state string (`running`, `exited`, ...) to a status.
    pub fn from_engine_state(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "created" => Self::Creating,
            "running" | "restarting" => Self::Running,
            "" => Self::Absent,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// A container as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Instance {
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub created_at: Option<DateTime<Utc>>,
    /// Host ports published by this container.
    pub host_ports: Vec<u16>,
    /// Whether the environment was created with persistent data.
    pub persist_data: bool,
}

/// Everything needed to create one environment container.
#[derive(Clone, Default)]
pub(crate) struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub work_dir: String,
    /// Bind specs in `source:target:mode` form (host paths or named volumes).
    pub binds: Vec<String>,
    pub ports: Vec<PortMapping>,
    /// `KEY=VALUE` assignments, secrets included.
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Shows only the keys of `env`; its values include secrets.
impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self
            .env
            .iter()
            .map(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k))
            .collect();
        f.debug_struct("ContainerSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("work_dir", &self.work_dir)
            .field("binds", &self.binds)
            .field("ports", &self.ports)
            .field("env", &env_keys)
            .field("labels", &self.labels)
            .finish()
    }
}

/// Per-exec overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExecOptions {
    pub user: Option<String>,
    pub work_dir: Option<String>,
}

/// Narrow client interface over the container engine.
#[async_trait]
pub(crate) trait ContainerEngine: Send + Sync {
    /// Checks that the engine is reachable.
    async fn ping(&self) -> Result<(), EngineError>;

    /// Looks up one container by exact name. `Ok(None)` when absent.
    async fn inspect(&self, name: &str) -> Result<Option<Instance>, EngineError>;

    /// Lists all containers (managed or not) whose name is exactly `name`.
    async fn list_by_name(&self, name: &str) -> Result<Vec<Instance>, EngineError>;

    /// Lists all containers carrying the agentbox label.
    async fn list_managed(&self) -> Result<Vec<Instance>, EngineError>;

    /// Host ports, with their protocol, published by any running container.
    async fn published_ports(&self) -> Result<Vec<(u16, Protocol)>, EngineError>;

    /// Returns true if `image` is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

    /// Pulls `image` from its registry.
    async fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Builds `context/Dockerfile` and tags the result as `tag`.
    async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        build_args: &HashMap<String, String>,
    ) -> Result<(), EngineError>;

    /// Creates (or reuses) a named volume with the given labels.
    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), EngineError>;

    /// Names of volumes labelled as belonging to environment `env_name`.
    async fn list_volumes(&self, env_name: &str) -> Result<Vec<String>, EngineError>;

    /// Removes a named volume.
    async fn remove_volume(&self, name: &str) -> Result<(), EngineError>;

    /// Creates a container. Returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Starts a created or stopped container.
    async fn start(&self, name: &str) -> Result<(), EngineError>;

    /// Stops a container, force-killing it after `grace`.
    async fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError>;

    /// Removes a container, optionally with its anonymous volumes.
    async fn remove(&self, name: &str, remove_volumes: bool) -> Result<(), EngineError>;

    /// Runs `command` through `sh -c` non-interactively, streaming its output
    /// into `stdout`/`stderr`. Returns the command's exit code.
    async fn exec(
        &self,
        name: &str,
        command: &str,
        options: &ExecOptions,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<i64, EngineError>;

    /// Attaches the caller's terminal to an interactive login shell.
    /// Returns the shell's exit code.
    async fn attach_shell(&self, name: &str, options: &ExecOptions) -> Result<i64, EngineError>;
}
