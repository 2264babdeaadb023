//! List agentbox environments as the engine currently sees them.

use colored::Colorize;
use std::fmt::Write;

use crate::engine::{ContainerEngine, Instance, InstanceStatus};
use crate::error::AppError;

/// Entry point. With `name`, shows only that environment.
pub(crate) async fn run(
    name: Option<&str>,
    json: bool,
    engine: &dyn ContainerEngine,
) -> Result<(), AppError> {
    engine.ping().await?;

    let instances = match name {
        Some(name) => {
            let instance = engine.inspect(name).await?.ok_or_else(|| AppError::NotFound {
                name: name.to_string(),
            })?;
            vec![instance]
        }
        None => engine.list_managed().await?,
    };

    if json {
        let out = serde_json::to_string_pretty(&instances)
            .map_err(|e| AppError::operation(format!("failed to encode status: {e}")))?;
        println!("{out}");
    } else {
        print!("{}", format_table(&instances));
    }
    Ok(())
}

fn format_table(instances: &[Instance]) -> String {
    let mut out = String::new();

    if instances.is_empty() {
        writeln!(&mut out, "{} No agentbox environments.", "ℹ".blue()).unwrap();
        writeln!(&mut out, "  Run {} to create one.", "agentbox up".green()).unwrap();
        return out;
    }

    writeln!(
        &mut out,
        "{:<24} {:<10} {:<20} {}",
        "NAME".bold(),
        "STATUS".bold(),
        "CREATED".bold(),
        "PORTS".bold()
    )
    .unwrap();

    for instance in instances {
        let status = instance.status.to_string();
        let status = match instance.status {
            InstanceStatus::Running => status.green(),
            InstanceStatus::Creating => status.yellow(),
            InstanceStatus::Stopped | InstanceStatus::Absent => status.red(),
        };
        let created = instance
            .created_at
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let ports = if instance.host_ports.is_empty() {
            "-".to_string()
        } else {
            instance
                .host_ports
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        writeln!(
            &mut out,
            "{:<24} {:<10} {:<20} {}",
            instance.name.cyan(),
            status,
            created,
            ports
        )
        .unwrap();
    }
    out
}
