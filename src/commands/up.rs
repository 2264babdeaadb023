//! Create and start an environment from `agentbox.env` plus CLI overrides.

use colored::Colorize;
use std::fmt::Write;
use std::path::PathBuf;

use crate::config::{EnvironmentConfig, Overrides};
use crate::engine::ContainerEngine;
use crate::error::AppError;
use crate::lifecycle::{Controller, ImageSource, UpReport};
use crate::validate::SystemProbe;

/// Arguments of `agentbox up`.
#[derive(Debug, Clone, Default)]
pub(crate) struct UpArgs {
    pub config: Option<PathBuf>,
    pub name: Option<String>,
    pub mounts: Vec<String>,
    pub ports: Vec<String>,
    pub secrets: Vec<String>,
}

/// Entry point: loads config from the current directory and brings the
/// environment up.
pub(crate) async fn run(args: UpArgs, engine: &dyn ContainerEngine) -> Result<(), AppError> {
    let cwd = std::env::current_dir()
        .map_err(|e| AppError::operation(format!("failed to get current directory: {e}")))?;

    let overrides = Overrides {
        name: args.name,
        mounts: args.mounts,
        ports: args.ports,
    };
    let config = EnvironmentConfig::load(&cwd, args.config.as_deref(), &overrides)?;

    let mut controller = Controller::new(engine, &SystemProbe);
    let report = controller.up(&config, &args.secrets).await?;

    print!("{}", format_report(&config, &report));
    Ok(())
}

/// Formats the summary printed after a successful `up`.
pub(crate) fn format_report(config: &EnvironmentConfig, report: &UpReport) -> String {
    let mut out = String::new();

    let source = match report.image_source {
        ImageSource::Built => "built",
        ImageSource::Local => "local",
        ImageSource::Pulled => "pulled",
    };

    writeln!(
        &mut out,
        "\n{} Environment {} is running",
        "✓".green().bold(),
        config.name.cyan().bold()
    )
    .unwrap();
    writeln!(
        &mut out,
        "  Container:  {}",
        short_id(&report.container_id).dimmed()
    )
    .unwrap();
    writeln!(&mut out, "  Image:      {} ({})", config.base_image.cyan(), source).unwrap();
    writeln!(&mut out, "  Workdir:    {}", config.work_dir.cyan()).unwrap();

    for mount in &config.mounts {
        writeln!(
            &mut out,
            "  Mount:      {} -> {} ({})",
            mount.host_path.display(),
            mount.container_path,
            mount.mode
        )
        .unwrap();
    }
    for port in &config.ports {
        writeln!(&mut out, "  Port:       {port}").unwrap();
    }
    if let Some(volume) = &report.data_volume {
        writeln!(&mut out, "  Data:       {volume} -> /data").unwrap();
    }
    if !report.secret_keys.is_empty() {
        writeln!(&mut out, "  Secrets:    {}", report.secret_keys.join(", ")).unwrap();
    }

    writeln!(
        &mut out,
        "\n  Run {} to get a shell",
        format!("agentbox shell {}", config.name).green()
    )
    .unwrap();
    out
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
