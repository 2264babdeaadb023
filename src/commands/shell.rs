//! Open a shell, or run one command, inside an environment.

use std::io;

use crate::engine::{ContainerEngine, ExecOptions};
use crate::error::AppError;
use crate::gateway::{self, ShellRequest};

/// Entry point. Returns the exit status of the shell or command.
pub(crate) async fn run(
    name: String,
    command: Option<String>,
    user: Option<String>,
    work_dir: Option<String>,
    engine: &dyn ContainerEngine,
) -> Result<i32, AppError> {
    let request = ShellRequest {
        name,
        command,
        options: ExecOptions { user, work_dir },
    };

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let code = gateway::open(engine, &request, &mut stdout, &mut stderr).await?;

    Ok(exit_status(code))
}

/// Engine exit codes are i64; anything outside i32 becomes 1.
fn exit_status(code: i64) -> i32 {
    i32::try_from(code).unwrap_or(1)
}
