//! Shell and command access to a running environment.

use std::io::Write;
use tracing::{debug, info};

use crate::engine::{ContainerEngine, ExecOptions, Instance, InstanceStatus};
use crate::error::AppError;
use crate::validate::{is_valid_name, ValidationError};

/// One `shell` invocation.
#[derive(Debug, Clone, Default)]
pub(crate) struct ShellRequest {
    pub name: String,
    /// Run this through `sh -c` instead of attaching interactively.
    pub command: Option<String>,
    pub options: ExecOptions,
}

/// Opens a session in environment `request.name` and returns the exit code
/// of the command or shell. Engine state is never changed, except for one
/// implicit start of a stopped environment.
pub(crate) async fn open(
    engine: &dyn ContainerEngine,
    request: &ShellRequest,
    stdout: &mut (dyn Write + Send),
    stderr: &mut (dyn Write + Send),
) -> Result<i64, AppError> {
    let name = request.name.as_str();
    if !is_valid_name(name) {
        return Err(ValidationError::InvalidName {
            name: name.to_string(),
        }
        .into());
    }

    engine.ping().await?;
    ensure_running(engine, name).await?;

    let code = match &request.command {
        Some(command) => {
            debug!("exec in {}: {}", name, command);
            engine
                .exec(name, command, &request.options, stdout, stderr)
                .await?
        }
        None => engine.attach_shell(name, &request.options).await?,
    };
    debug!("{} session exited with {}", name, code);
    Ok(code)
}

async fn ensure_running(engine: &dyn ContainerEngine, name: &str) -> Result<Instance, AppError> {
    let instance = engine
        .inspect(name)
        .await?
        .ok_or_else(|| AppError::NotFound {
            name: name.to_string(),
        })?;
    if instance.status == InstanceStatus::Running {
        return Ok(instance);
    }

    info!("Environment {} is {}, starting it", name, instance.status);
    if let Err(e) = engine.start(name).await {
        debug!("Implicit start of {} failed: {}", name, e);
    }

    match engine.inspect(name).await? {
        Some(i) if i.status == InstanceStatus::Running => Ok(i),
        _ => Err(AppError::NotRunning {
            name: name.to_string(),
        }),
    }
}
