//! Environment lifecycle: `up` and `down` against the container engine.
//!
//! ```text
//! ABSENT -> VALIDATING -> PREPARING_IMAGE -> CREATING -> WAITING_HEALTHY -> RUNNING
//! VALIDATING -(fail)-> ABSENT
//! WAITING_HEALTHY -(timeout)-> FAILED -(cleanup)-> ABSENT
//! RUNNING -> STOPPING -> REMOVING -> ABSENT
//! ```
//!
//! `up` is not idempotent: a second call with the same name is a conflict.
//! `down` is: tearing down an absent environment succeeds.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::EnvironmentConfig;
use crate::engine::{
    ContainerEngine, ContainerSpec, EngineError, Instance, InstanceStatus, LABEL_ENV,
    LABEL_MANAGED, LABEL_PERSIST,
};
use crate::error::AppError;
use crate::secrets::{env_assignments, Secret};
use crate::validate::{is_valid_name, HostProbe, ValidationError, Validator};

/// Grace period before a stopping container is killed.
pub(crate) const STOP_GRACE: Duration = Duration::from_secs(30);

/// Mount point of the persistent data volume.
pub(crate) const DATA_VOLUME_TARGET: &str = "/data";

/// States an environment moves through during one controller call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Absent,
    Validating,
    PreparingImage,
    Creating,
    WaitingHealthy,
    Running,
    Failed,
    Stopping,
    Removing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Validating => "validating",
            Self::PreparingImage => "preparing-image",
            Self::Creating => "creating",
            Self::WaitingHealthy => "waiting-healthy",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopping => "stopping",
            Self::Removing => "removing",
        };
        write!(f, "{s}")
    }
}

/// Polling parameters for the running-status wait after start.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HealthWait {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthWait {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Where the image for a new environment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageSource {
    /// Built from the local build file.
    Built,
    /// Already present in the engine.
    Local,
    /// Pulled from a registry.
    Pulled,
}

/// Summary of a successful `up`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpReport {
    pub container_id: String,
    pub image_source: ImageSource,
    /// Keys of the injected secrets; values are never kept.
    pub secret_keys: Vec<String>,
    pub data_volume: Option<String>,
}

/// Flags for `down`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DownOptions {
    /// Skip the confirmation callback.
    pub skip_confirmation: bool,
    /// Keep anonymous and labelled volumes.
    pub keep_volumes: bool,
}

/// What `down` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DownOutcome {
    /// Container removed, along with these volumes.
    Removed { volumes: Vec<String> },
    /// Nothing to do.
    NotFound,
    /// The caller declined the confirmation.
    Cancelled,
}

/// Drives one environment through its lifecycle.
pub(crate) struct Controller<'a> {
    engine: &'a dyn ContainerEngine,
    probe: &'a dyn HostProbe,
    health: HealthWait,
    phases: Vec<Phase>,
}

impl<'a> Controller<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, probe: &'a dyn HostProbe) -> Self {
        Self {
            engine,
            probe,
            health: HealthWait::default(),
            phases: vec![Phase::Absent],
        }
    }

    /// Overrides the health-wait polling parameters.
    #[cfg(test)]
    pub fn with_health_wait(mut self, health: HealthWait) -> Self {
        self.health = health;
        self
    }

    /// Phases visited so far, starting at `Absent`.
    #[cfg(test)]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    fn transition(&mut self, phase: Phase) {
        if let Some(from) = self.phases.last() {
            debug!("{} -> {}", from, phase);
        }
        self.phases.push(phase);
    }

    /// Validates, prepares the image, creates and starts the environment,
    /// then waits for it to report running.
    pub async fn up(
        &mut self,
        config: &EnvironmentConfig,
        raw_secrets: &[String],
    ) -> Result<UpReport, AppError> {
        self.transition(Phase::Validating);
        let secrets = match Validator::new(self.engine, self.probe)
            .validate(config, raw_secrets)
            .await
        {
            Ok(secrets) => secrets,
            Err(e) => {
                self.transition(Phase::Absent);
                return Err(e);
            }
        };

        self.transition(Phase::PreparingImage);
        let image_source = self.prepare_image(config).await.map_err(operation)?;

        self.transition(Phase::Creating);
        let data_volume = if config.persist_data {
            let volume = data_volume_name(&config.name);
            let labels = HashMap::from([(LABEL_ENV.to_string(), config.name.clone())]);
            self.engine
                .create_volume(&volume, &labels)
                .await
                .map_err(operation)?;
            Some(volume)
        } else {
            None
        };

        let spec = container_spec(config, &secrets);
        let container_id = self.engine.create(&spec).await.map_err(operation)?;

        if let Err(e) = self.engine.start(&config.name).await {
            self.abandon(&config.name).await;
            return Err(operation(e));
        }

        self.transition(Phase::WaitingHealthy);
        if let Err(e) = self.wait_running(&config.name).await {
            self.abandon(&config.name).await;
            return Err(operation(e));
        }

        self.transition(Phase::Running);
        info!("Environment {} is running", config.name);

        Ok(UpReport {
            container_id,
            image_source,
            secret_keys: secrets.iter().map(|s| s.key().to_string()).collect(),
            data_volume,
        })
    }

    /// Stops and removes the environment. An absent environment is success.
    ///
    /// `confirm` is asked once unless `options.skip_confirmation` is set.
    /// Every cleanup step is attempted even if an earlier one fails; the
    /// failures are reported together afterwards.
    pub async fn down<C>(
        &mut self,
        name: &str,
        options: DownOptions,
        confirm: C,
    ) -> Result<DownOutcome, AppError>
    where
        C: FnOnce(&Instance) -> bool,
    {
        if !is_valid_name(name) {
            return Err(ValidationError::InvalidName {
                name: name.to_string(),
            }
            .into());
        }

        self.engine.ping().await?;

        let Some(instance) = self.engine.inspect(name).await? else {
            info!("Environment {} not found, nothing to remove", name);
            return Ok(DownOutcome::NotFound);
        };

        if !options.skip_confirmation && !confirm(&instance) {
            return Ok(DownOutcome::Cancelled);
        }

        let mut failures: Vec<EngineError> = Vec::new();

        if matches!(
            instance.status,
            InstanceStatus::Running | InstanceStatus::Creating
        ) {
            self.transition(Phase::Stopping);
            if let Err(e) = self.engine.stop(name, STOP_GRACE).await {
                warn!("Stop failed for {}: {}", name, e);
                failures.push(e);
            }
        }

        self.transition(Phase::Removing);
        let drop_volumes = !options.keep_volumes;
        match self.engine.remove(name, drop_volumes).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!("Remove failed for {}: {}", name, e);
                failures.push(e);
            }
        }

        let mut volumes = Vec::new();
        if drop_volumes && !instance.persist_data {
            match self.engine.list_volumes(name).await {
                Ok(found) => {
                    for volume in found {
                        match self.engine.remove_volume(&volume).await {
                            Ok(()) => volumes.push(volume),
                            Err(e) => {
                                warn!("Volume removal failed for {}: {}", volume, e);
                                failures.push(e);
                            }
                        }
                    }
                }
                Err(e) => failures.push(e),
            }
        }

        self.transition(Phase::Absent);

        if failures.is_empty() {
            Ok(DownOutcome::Removed { volumes })
        } else {
            let details: Vec<String> = failures.iter().map(ToString::to_string).collect();
            Err(AppError::operation(format!(
                "teardown of '{name}' incomplete: {}",
                details.join("; ")
            )))
        }
    }

    async fn prepare_image(&self, config: &EnvironmentConfig) -> Result<ImageSource, EngineError> {
        if let Some(context) = &config.build_context {
            self.engine
                .build_image(context, &config.base_image, &config.build_args())
                .await?;
            return Ok(ImageSource::Built);
        }
        if self.engine.image_exists(&config.base_image).await? {
            debug!("Image {} present locally", config.base_image);
            return Ok(ImageSource::Local);
        }
        self.engine.pull_image(&config.base_image).await?;
        Ok(ImageSource::Pulled)
    }

    async fn wait_running(&self, name: &str) -> Result<(), EngineError> {
        let deadline = Instant::now() + self.health.timeout;
        loop {
            match self.engine.inspect(name).await? {
                Some(i) if i.status == InstanceStatus::Running => return Ok(()),
                Some(i) if i.status == InstanceStatus::Stopped => {
                    return Err(EngineError::failed(
                        "start container",
                        "container exited during startup",
                    ));
                }
                Some(i) => debug!("{} is {}, waiting", name, i.status),
                None => return Err(EngineError::not_found(name)),
            }
            if Instant::now() >= deadline {
                return Err(EngineError::start_timeout(self.health.timeout));
            }
            sleep(self.health.interval).await;
        }
    }

    /// Best-effort removal of a container that failed to come up.
    async fn abandon(&mut self, name: &str) {
        self.transition(Phase::Failed);
        if let Err(e) = self.engine.remove(name, true).await {
            warn!("Cleanup of {} failed: {}", name, e);
        }
        self.transition(Phase::Absent);
    }
}

/// Engine failures after validation are operation failures, whatever the cause.
fn operation(err: EngineError) -> AppError {
    AppError::operation(err.to_string())
}

/// Name of the persistent data volume for environment `name`.
pub(crate) fn data_volume_name(name: &str) -> String {
    format!("{name}-data")
}

/// Translates a validated config into the engine's creation request.
pub(crate) fn container_spec(config: &EnvironmentConfig, secrets: &[Secret]) -> ContainerSpec {
    let mut binds: Vec<String> = config.mounts.iter().map(|m| m.bind_spec()).collect();
    if config.persist_data {
        binds.push(format!(
            "{}:{DATA_VOLUME_TARGET}:rw",
            data_volume_name(&config.name)
        ));
    }

    let labels = HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_PERSIST.to_string(), config.persist_data.to_string()),
    ]);

    ContainerSpec {
        name: config.name.clone(),
        image: config.base_image.clone(),
        work_dir: config.work_dir.clone(),
        binds,
        ports: config.ports.clone(),
        env: env_assignments(&config.env_vars, secrets),
        labels,
    }
}
