use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogOutput, RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::service::{
    ContainerInspectResponse, ContainerSummary, ExecInspectResponse, HostConfig, Port,
    PortBinding, PortTypeEnum,
};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions};
use bollard::Docker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tar::Builder;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{
    ContainerEngine, ContainerSpec, EngineError, ExecOptions, Instance, InstanceStatus,
    LABEL_ENV, LABEL_MANAGED, LABEL_PERSIST,
};
use crate::config::Protocol;

/// Shell started for interactive sessions: bash when the image has it.
const LOGIN_SHELL: &str = "if command -v bash >/dev/null 2>&1; then exec bash -l; else exec sh -l; fi";

/// How long to wait for a finished exec to report its exit code.
const EXEC_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const EXEC_SETTLE_INTERVAL: Duration = Duration::from_millis(50);

/// Container engine backed by the Docker API (dockerd, Docker Desktop, OrbStack).
pub(crate) struct DockerEngine {
    connection: Result<Docker, String>,
}

impl DockerEngine {
    /// Prepares a client for the local engine socket.
    ///
    /// Connection problems are reported by the first call that needs the
    /// engine, so offline validation still runs without a daemon.
    pub fn connect() -> Self {
        Self {
            connection: Docker::connect_with_local_defaults().map_err(|e| e.to_string()),
        }
    }

    fn client(&self) -> Result<&Docker, EngineError> {
        self.connection
            .as_ref()
            .map_err(|message| EngineError::unavailable(message.clone()))
    }

    async fn summaries(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        self.client()?
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| engine_error("list containers", e))
    }

    async fn list(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<Instance>, EngineError> {
        let containers = self.summaries(filters).await?;
        Ok(containers.into_iter().map(instance_from_summary).collect())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.client()?
            .ping()
            .await
            .map_err(|e| EngineError::unavailable(e.to_string()))?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<Instance>, EngineError> {
        match self
            .client()?
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => Ok(instance_from_inspect(name, response)),
            Err(e) if is_status(&e, 404) => Ok(None),
            Err(e) => Err(engine_error("inspect container", e)),
        }
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<Instance>, EngineError> {
        // The engine's name filter is a regex match, so re-check exactly.
        let filters = HashMap::from([("name".to_string(), vec![format!("^/{name}$")])]);
        let found = self.list(filters).await?;
        Ok(found.into_iter().filter(|i| i.name == name).collect())
    }

    async fn list_managed(&self) -> Result<Vec<Instance>, EngineError> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{LABEL_MANAGED}=true")],
        )]);
        self.list(filters).await
    }

    async fn published_ports(&self) -> Result<Vec<(u16, Protocol)>, EngineError> {
        let running = HashMap::from([("status".to_string(), vec!["running".to_string()])]);
        let containers = self.summaries(running).await?;
        Ok(containers
            .into_iter()
            .flat_map(|c| c.ports.unwrap_or_default())
            .filter_map(published_port)
            .collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        match self.client()?.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(engine_error("inspect image", e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        info!("Pulling image {}", image);

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.client()?.create_image(Some(options), None, None);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(EngineError::failed("pull image", error));
                    }
                    if let Some(status) = output.status {
                        debug!("pull: {}", status.trim());
                    }
                }
                Err(e) if is_status(&e, 404) => return Err(EngineError::image_not_found(image)),
                Err(e) => return Err(engine_error("pull image", e)),
            }
        }

        info!("Image pulled: {}", image);
        Ok(())
    }

    async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        build_args: &HashMap<String, String>,
    ) -> Result<(), EngineError> {
        info!("Building image {} from {}", tag, context.display());

        let mut tar_buf = Vec::new();
        {
            let mut tar = Builder::new(&mut tar_buf);
            tar.append_dir_all(".", context)
                .map_err(|e| EngineError::failed("package build context", e.to_string()))?;
            tar.finish()
                .map_err(|e| EngineError::failed("package build context", e.to_string()))?;
        }

        let options = BuildImageOptions {
            dockerfile: crate::config::BUILD_FILE.to_string(),
            t: tag.to_string(),
            buildargs: build_args.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .client()?
            .build_image(options, None, Some(Bytes::from(tar_buf)));

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(EngineError::failed("build image", error));
                    }
                    if let Some(text) = output.stream {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            debug!("build: {}", trimmed);
                        }
                    }
                }
                Err(e) => return Err(engine_error("build image", e)),
            }
        }

        info!("Image built: {}", tag);
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), EngineError> {
        self.client()?
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                labels: labels.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| engine_error("create volume", e))?;
        Ok(())
    }

    async fn list_volumes(&self, env_name: &str) -> Result<Vec<String>, EngineError> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{LABEL_ENV}={env_name}")],
        )]);
        let response = self
            .client()?
            .list_volumes(Some(ListVolumesOptions { filters }))
            .await
            .map_err(|e| engine_error("list volumes", e))?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), EngineError> {
        match self.client()?.remove_volume(name, None).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(engine_error("remove volume", e)),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            exposed_ports.insert(port.container_key(), HashMap::new());
            port_bindings.insert(
                port.container_key(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            working_dir: Some(spec.work_dir.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            // Same as `run -dit`: keeps the image's shell alive in the background.
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        debug!("Creating container {}", spec.name);
        let response = self
            .client()?
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| match e {
                e if is_status(&e, 404) => EngineError::image_not_found(&spec.image),
                e => engine_error("create container", e),
            })?;

        for warning in response.warnings {
            warn!("engine: {}", warning);
        }
        Ok(response.id)
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        debug!("Starting container {}", name);
        match self.client()?.start_container::<String>(name, None).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(EngineError::not_found(name)),
            Err(e) => Err(engine_error("start container", e)),
        }
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), EngineError> {
        debug!("Stopping container {} (grace {}s)", name, grace.as_secs());
        let options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        match self.client()?.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(EngineError::not_found(name)),
            Err(e) => Err(engine_error("stop container", e)),
        }
    }

    async fn remove(&self, name: &str, remove_volumes: bool) -> Result<(), EngineError> {
        debug!("Removing container {}", name);
        let options = RemoveContainerOptions {
            force: true,
            v: remove_volumes,
            ..Default::default()
        };
        match self.client()?.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(EngineError::not_found(name)),
            Err(e) => Err(engine_error("remove container", e)),
        }
    }

    async fn exec(
        &self,
        name: &str,
        command: &str,
        options: &ExecOptions,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<i64, EngineError> {
        let docker = self.client()?;
        let exec = docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", command]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    user: options.user.as_deref(),
                    working_dir: options.work_dir.as_deref(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| engine_error("create exec", e))?;

        if let StartExecResults::Attached {
            output: mut stream, ..
        } = docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| engine_error("start exec", e))?
        {
            while let Some(chunk) = stream.next().await {
                let written = match chunk.map_err(|e| engine_error("read exec output", e))? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        stdout.write_all(&message)
                    }
                    LogOutput::StdErr { message } => stderr.write_all(&message),
                    LogOutput::StdIn { .. } => Ok(()),
                };
                written.map_err(|e| EngineError::failed("write exec output", e.to_string()))?;
            }
        }
        let _ = stdout.flush();
        let _ = stderr.flush();

        // The output stream can close before the daemon records the exit code.
        let deadline = Instant::now() + EXEC_SETTLE_TIMEOUT;
        loop {
            let inspected = docker
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| engine_error("inspect exec", e))?;
            if let Some(code) = settled_exit_code(&inspected) {
                return Ok(code);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::failed(
                    "inspect exec",
                    "exit code not reported by the engine",
                ));
            }
            sleep(EXEC_SETTLE_INTERVAL).await;
        }
    }

    async fn attach_shell(&self, name: &str, options: &ExecOptions) -> Result<i64, EngineError> {
        // A TTY session needs the caller's terminal, which the CLI handles.
        let args = attach_args(name, options);
        debug!("Running: docker {}", shell_words::join(&args));

        let status = tokio::process::Command::new("docker")
            .args(&args)
            .status()
            .await
            .map_err(|e| EngineError::unavailable(format!("failed to run docker CLI: {e}")))?;

        Ok(status.code().map_or(-1, i64::from))
    }
}

fn attach_args(name: &str, options: &ExecOptions) -> Vec<String> {
    let mut args = vec!["exec".to_string(), "-it".to_string()];
    if let Some(user) = &options.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }
    if let Some(dir) = &options.work_dir {
        args.push("--workdir".to_string());
        args.push(dir.clone());
    }
    args.push(name.to_string());
    args.push("sh".to_string());
    args.push("-c".to_string());
    args.push(LOGIN_SHELL.to_string());
    args
}

fn is_status(err: &BollardError, code: u16) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

fn engine_error(operation: &'static str, err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError { message, .. } => {
            EngineError::failed(operation, message)
        }
        other => EngineError::failed(operation, other.to_string()),
    }
}

/// Exit code of an exec once the engine reports it finished.
fn settled_exit_code(inspected: &ExecInspectResponse) -> Option<i64> {
    match inspected.running {
        Some(false) => inspected.exit_code,
        _ => None,
    }
}

/// Host port and protocol of one published binding. SCTP has no
/// counterpart in a port mapping and is skipped.
fn published_port(port: Port) -> Option<(u16, Protocol)> {
    let protocol = match port.typ {
        Some(PortTypeEnum::UDP) => Protocol::Udp,
        Some(PortTypeEnum::SCTP) => return None,
        _ => Protocol::Tcp,
    };
    port.public_port.map(|p| (p, protocol))
}

/// The engine also resolves unique ID prefixes, so a response whose name
/// differs from `requested` belongs to another container.
fn instance_from_inspect(requested: &str, response: ContainerInspectResponse) -> Option<Instance> {
    let name = response.name.as_deref()?.trim_start_matches('/').to_string();
    if name != requested {
        debug!("{} resolved to container {}, ignoring", requested, name);
        return None;
    }

    let state = response.state.unwrap_or_default();
    let status = if state.running == Some(true) {
        InstanceStatus::Running
    } else {
        state.status.map_or(InstanceStatus::Stopped, |s| {
            InstanceStatus::from_engine_state(&s.to_string())
        })
    };

    let host_ports = response
        .host_config
        .and_then(|hc| hc.port_bindings)
        .map(|bindings| {
            bindings
                .into_values()
                .flatten()
                .flatten()
                .filter_map(|b| b.host_port.and_then(|p| p.parse().ok()))
                .collect()
        })
        .unwrap_or_default();

    let labels = response.config.and_then(|c| c.labels).unwrap_or_default();

    Some(Instance {
        id: response.id.unwrap_or_default(),
        name,
        status,
        created_at: response
            .created
            .and_then(|c| DateTime::parse_from_rfc3339(&c).ok())
            .map(|d| d.with_timezone(&Utc)),
        host_ports,
        persist_data: labels.get(LABEL_PERSIST).is_some_and(|v| v == "true"),
    })
}

fn instance_from_summary(summary: ContainerSummary) -> Instance {
    let labels = summary.labels.unwrap_or_default();
    Instance {
        id: summary.id.unwrap_or_default(),
        name: summary
            .names
            .and_then(|names| names.into_iter().next())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        status: InstanceStatus::from_engine_state(summary.state.as_deref().unwrap_or("")),
        created_at: summary
            .created
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        host_ports: summary
            .ports
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.public_port)
            .collect(),
        persist_data: labels.get(LABEL_PERSIST).is_some_and(|v| v == "true"),
    }
}
