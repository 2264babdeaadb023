use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod engine;
mod error;
mod gateway;
mod lifecycle;
mod secrets;
mod templates;
mod validate;

use engine::DockerEngine;
use error::{AppError, ResultCode};

#[derive(Parser)]
#[command(name = "agentbox")]
#[command(
    author,
    version,
    about = "Disposable Node.js + Python dev containers for AI agents"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write agentbox.env, Dockerfile and agentbox-info.sh here
    Init {
        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Create and start an environment
    Up {
        /// Environment file (default: ./agentbox.env)
        #[arg(short, long, env = "AGENTBOX_CONFIG")]
        config: Option<PathBuf>,

        /// Environment name (overrides ENV_NAME)
        #[arg(short, long)]
        name: Option<String>,

        /// Extra bind mount, HOST:CONTAINER[:ro|rw]
        #[arg(short, long = "mount", value_name = "H:C[:MODE]")]
        mounts: Vec<String>,

        /// Extra published port, HOST:CONTAINER[/tcp|udp]
        #[arg(short, long = "port", value_name = "H:C")]
        ports: Vec<String>,

        /// Secret injected as an environment variable, KEY=VALUE
        #[arg(short, long = "secret", value_name = "K=V")]
        secrets: Vec<String>,
    },

    /// Stop and remove an environment
    Down {
        /// Environment name
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,

        /// Keep volumes attached to the environment
        #[arg(long)]
        keep_volumes: bool,
    },

    /// Open a shell, or run a command, in an environment
    Shell {
        /// Environment name
        name: String,

        /// Run this command instead of an interactive shell
        #[arg(short, long)]
        command: Option<String>,

        /// User to run as
        #[arg(short, long)]
        user: Option<String>,

        /// Working directory inside the container
        #[arg(short, long)]
        workdir: Option<String>,
    },

    /// List environments managed by agentbox
    Status {
        /// Show only this environment
        name: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // Usage errors share the invalid-args code; help and version succeed.
            let code = if err.use_stderr() {
                ResultCode::InvalidArgs
            } else {
                ResultCode::Success
            };
            std::process::exit(code.exit_code());
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("agentbox=debug")
        } else {
            EnvFilter::new("agentbox=info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprint!("{}", error::format_error(&err));
            err.code().exit_code()
        }
    };
    std::process::exit(code);
}

/// Runs one command and returns the process exit status.
async fn dispatch(command: Commands) -> Result<i32, AppError> {
    let success = ResultCode::Success.exit_code();

    match command {
        Commands::Init { force } => {
            commands::init::run(force).map_err(|e| AppError::operation(format!("{e:#}")))?;
            Ok(success)
        }
        Commands::Up {
            config,
            name,
            mounts,
            ports,
            secrets,
        } => {
            let args = commands::up::UpArgs {
                config,
                name,
                mounts,
                ports,
                secrets,
            };
            commands::up::run(args, &DockerEngine::connect()).await?;
            Ok(success)
        }
        Commands::Down {
            name,
            force,
            keep_volumes,
        } => {
            commands::down::run(&name, force, keep_volumes, &DockerEngine::connect()).await?;
            Ok(success)
        }
        Commands::Shell {
            name,
            command,
            user,
            workdir,
        } => commands::shell::run(name, command, user, workdir, &DockerEngine::connect()).await,
        Commands::Status { name, json } => {
            commands::status::run(name.as_deref(), json, &DockerEngine::connect()).await?;
            Ok(success)
        }
    }
}
