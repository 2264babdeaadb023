//! Write a starter environment definition into the current directory.
//!
//! File IO is passed in as closures so the core logic is testable without
//! touching disk.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::{BUILD_FILE, CONFIG_FILE};
use crate::templates;

/// One file `init` writes: relative path, content and a short label.
type InitFile = (&'static str, &'static str, &'static str);

const INIT_FILES: [InitFile; 3] = [
    (CONFIG_FILE, templates::AGENTBOX_ENV, "environment definition"),
    (BUILD_FILE, templates::DOCKERFILE, "Node.js + Python image, built by `up`"),
    ("agentbox-info.sh", templates::INFO_SCRIPT, "installed in the image as agentbox-info"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteResult {
    Created,
    Overwritten,
    Skipped,
}

/// Runs the init command in the current directory.
pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    info!("Initializing agentbox in {}", cwd.display());

    let results = write_files(
        &INIT_FILES,
        force,
        |path| cwd.join(path).exists(),
        |path, content| {
            fs::write(cwd.join(path), content)
                .with_context(|| format!("Failed to write {}", path.display()))
        },
    )?;

    print!("{}", format_results(&INIT_FILES, &results));
    Ok(())
}

/// Writes each file unless it exists and `force` is off. Results are in
/// the order of `files`.
fn write_files<E, W>(
    files: &[InitFile],
    force: bool,
    exists: E,
    mut write_file: W,
) -> Result<Vec<WriteResult>>
where
    E: Fn(&Path) -> bool,
    W: FnMut(&Path, &str) -> Result<()>,
{
    files
        .iter()
        .map(|&(path, content, _)| -> Result<WriteResult> {
            let path = Path::new(path);
            let existed = exists(path);
            if existed && !force {
                return Ok(WriteResult::Skipped);
            }
            write_file(path, content)?;
            Ok(if existed {
                WriteResult::Overwritten
            } else {
                WriteResult::Created
            })
        })
        .collect()
}

fn format_results(files: &[InitFile], results: &[WriteResult]) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{} agentbox initialized\n", "✓".green().bold()).unwrap();

    for (&(path, _, label), result) in files.iter().zip(results) {
        let line = match result {
            WriteResult::Created => format!("  {} - {label}", path.cyan()),
            WriteResult::Overwritten => format!("  {} {path} (overwritten)", "↻".blue()),
            WriteResult::Skipped => format!(
                "  {} {path} (already exists, use --force to overwrite)",
                "⊘".yellow()
            ),
        };
        writeln!(&mut out, "{line}").unwrap();
    }

    writeln!(
        &mut out,
        "\nSet ENV_NAME and HOST_MOUNTS in {}, then run {}",
        CONFIG_FILE.cyan(),
        "agentbox up".green()
    )
    .unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[test]
    fn test_templates_are_consistent() {
        assert!(templates::AGENTBOX_ENV.contains("ENV_NAME="));
        assert!(templates::AGENTBOX_ENV.contains("BASE_IMAGE="));
        assert!(templates::AGENTBOX_ENV.contains("WORK_DIR="));
        assert!(templates::DOCKERFILE.contains("ARG NODEJS_VERSION"));
        assert!(templates::DOCKERFILE.contains("ARG PYTHON_VERSION"));
        assert!(templates::DOCKERFILE
            .contains("COPY agentbox-info.sh /usr/local/bin/agentbox-info"));
        assert!(templates::INFO_SCRIPT.starts_with("#!/bin/sh"));
    }

    #[test]
    fn test_default_config_loads() {
        use crate::config::{EnvironmentConfig, Overrides};

        let entries: HashMap<String, String> =
            dotenvy::from_read_iter(templates::AGENTBOX_ENV.as_bytes())
                .collect::<Result<_, _>>()
                .unwrap();
        let dir = Path::new("/proj");
        let config =
            EnvironmentConfig::from_entries(&entries, dir, dir, &Overrides::default()).unwrap();

        assert_eq!(config.name, "agentbox-dev");
        assert_eq!(config.work_dir, "/workspace");
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(
            config.env_vars.get("NODE_ENV").map(String::as_str),
            Some("development")
        );
        assert!(!config.persist_data);
    }

    #[test]
    fn test_write_files_only_missing_without_force() {
        let written = RefCell::new(HashMap::new());

        let results = write_files(
            &INIT_FILES,
            false,
            |path| path == Path::new(CONFIG_FILE),
            |path, content| {
                written
                    .borrow_mut()
                    .insert(path.to_path_buf(), content.to_string());
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(
            results,
            vec![WriteResult::Skipped, WriteResult::Created, WriteResult::Created]
        );
        assert!(!written.borrow().contains_key(Path::new(CONFIG_FILE)));
        assert_eq!(
            written.borrow().get(Path::new(BUILD_FILE)).map(String::as_str),
            Some(templates::DOCKERFILE)
        );
    }

    #[test]
    fn test_write_files_overwrites_with_force() {
        let mut count = 0;

        let results = write_files(&INIT_FILES, true, |_| true, |_, _| {
            count += 1;
            Ok(())
        })
        .unwrap();

        assert!(results.iter().all(|r| *r == WriteResult::Overwritten));
        assert_eq!(count, INIT_FILES.len());
    }

    #[test]
    fn test_write_files_propagates_write_error() {
        let result = write_files(&INIT_FILES, false, |_| false, |_, _| {
            Err(anyhow::anyhow!("read-only filesystem"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_format_results() {
        let results = [
            WriteResult::Created,
            WriteResult::Skipped,
            WriteResult::Overwritten,
        ];

        let output = format_results(&INIT_FILES, &results);
        assert!(output.contains("agentbox initialized"));
        assert!(output.contains("environment definition"));
        assert!(output.contains("--force"));
        assert!(output.contains("agentbox-info.sh (overwritten)"));
        assert!(output.contains("agentbox up"));
    }
}
