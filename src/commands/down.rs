//! Stop and remove an environment.

use colored::Colorize;
use dialoguer::Confirm;
use std::fmt::Write;

use crate::engine::{ContainerEngine, Instance};
use crate::error::AppError;
use crate::lifecycle::{Controller, DownOptions, DownOutcome};
use crate::validate::SystemProbe;

/// Entry point. Asks for confirmation on the terminal unless `force` is set.
pub(crate) async fn run(
    name: &str,
    force: bool,
    keep_volumes: bool,
    engine: &dyn ContainerEngine,
) -> Result<(), AppError> {
    let options = DownOptions {
        skip_confirmation: force,
        keep_volumes,
    };

    let outcome = Controller::new(engine, &SystemProbe)
        .down(name, options, confirm)
        .await?;

    print!("{}", format_outcome(name, &outcome));
    Ok(())
}

/// Interactive prompt. A non-interactive terminal counts as "no".
fn confirm(instance: &Instance) -> bool {
    Confirm::new()
        .with_prompt(format!(
            "Destroy environment '{}' ({})?",
            instance.name, instance.status
        ))
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn format_outcome(name: &str, outcome: &DownOutcome) -> String {
    let mut out = String::new();
    match outcome {
        DownOutcome::Removed { volumes } => {
            writeln!(
                &mut out,
                "{} Environment {} removed",
                "✓".green().bold(),
                name.cyan()
            )
            .unwrap();
            for volume in volumes {
                writeln!(&mut out, "  {} volume {}", "✗".red(), volume.dimmed()).unwrap();
            }
        }
        DownOutcome::NotFound => {
            writeln!(
                &mut out,
                "{} Environment {} not found, nothing to do",
                "ℹ".blue(),
                name.cyan()
            )
            .unwrap();
        }
        DownOutcome::Cancelled => {
            writeln!(&mut out, "{} Cancelled", "⊘".yellow()).unwrap();
            writeln!(
                &mut out,
                "  Run {} to skip the prompt",
                format!("agentbox down {name} --force").green()
            )
            .unwrap();
        }
    }
    out
}
