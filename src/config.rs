//! Environment configuration: `agentbox.env` plus command-line overrides.

mod parse;

pub(crate) use parse::{is_identifier, Mount, ParseError, PortMapping, Protocol};
#[cfg(test)]
pub(crate) use parse::MountMode;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use parse::{parse_env_var, split_list};

/// Default configuration file, looked up in the project directory.
pub(crate) const CONFIG_FILE: &str = "agentbox.env";

/// Build file that switches image preparation from pull to build.
pub(crate) const BUILD_FILE: &str = "Dockerfile";

const KEY_NAME: &str = "ENV_NAME";
const KEY_IMAGE: &str = "BASE_IMAGE";
const KEY_NODEJS: &str = "NODEJS_VERSION";
const KEY_PYTHON: &str = "PYTHON_VERSION";
const KEY_WORK_DIR: &str = "WORK_DIR";
const KEY_MOUNTS: &str = "HOST_MOUNTS";
const KEY_PORTS: &str = "PORTS";
const KEY_ENV: &str = "ENVIRONMENT_VARS";
const KEY_PERSIST: &str = "PERSIST_DATA";

const KNOWN_KEYS: &[&str] = &[
    KEY_NAME,
    KEY_IMAGE,
    KEY_NODEJS,
    KEY_PYTHON,
    KEY_WORK_DIR,
    KEY_MOUNTS,
    KEY_PORTS,
    KEY_ENV,
    KEY_PERSIST,
];

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The config file exists but could not be read or tokenized.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    /// A required key is absent from both the file and the CLI.
    #[error("missing required field {key}")]
    MissingField { key: &'static str },

    /// A scalar value could not be interpreted.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    /// A list entry (mount, port, env var) is malformed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Values supplied on the command line.
///
/// `name` replaces the file's `ENV_NAME`; mounts and ports are appended
/// after the file's entries.
#[derive(Debug, Clone, Default)]
pub(crate) struct Overrides {
    pub name: Option<String>,
    pub mounts: Vec<String>,
    pub ports: Vec<String>,
}

/// The resolved description of one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EnvironmentConfig {
    pub name: String,
    pub base_image: String,
    pub work_dir: String,
    pub mounts: Vec<Mount>,
    pub ports: Vec<PortMapping>,
    pub env_vars: BTreeMap<String, String>,
    pub persist_data: bool,
    pub nodejs_version: Option<String>,
    pub python_version: Option<String>,
    /// Directory to build `base_image` from, when it holds a build file.
    pub build_context: Option<PathBuf>,
}

impl EnvironmentConfig {
    /// Loads the config file and applies CLI overrides.
    ///
    /// `config_path` defaults to [`CONFIG_FILE`] in `project_dir`. A missing
    /// default file behaves like an empty one; a missing explicit file is an
    /// error.
    pub fn load(
        project_dir: &Path,
        config_path: Option<&Path>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let (path, explicit) = match config_path {
            Some(p) if p.is_absolute() => (p.to_path_buf(), true),
            Some(p) => (project_dir.join(p), true),
            None => (project_dir.join(CONFIG_FILE), false),
        };

        let entries = if path.exists() {
            debug!("Loading config from {}", path.display());
            read_entries(&path)?
        } else if explicit {
            return Err(ConfigError::NotFound { path });
        } else {
            debug!("No config file at {}, using CLI values only", path.display());
            HashMap::new()
        };

        let config_dir = path
            .parent()
            .map_or_else(|| project_dir.to_path_buf(), Path::to_path_buf);

        let mut config = Self::from_entries(&entries, &config_dir, project_dir, overrides)?;
        if config_dir.join(BUILD_FILE).is_file() {
            config.build_context = Some(config_dir);
        }
        Ok(config)
    }

    /// Builds a config from already-tokenized file entries.
    ///
    /// Relative mount paths from the file resolve against `config_dir`;
    /// relative mount paths from the CLI resolve against `project_dir`.
    pub fn from_entries(
        entries: &HashMap<String, String>,
        config_dir: &Path,
        project_dir: &Path,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        for key in entries.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!("Ignoring unknown config key {}", key);
            }
        }

        let name = overrides
            .name
            .clone()
            .or_else(|| entries.get(KEY_NAME).cloned())
            .ok_or(ConfigError::MissingField { key: KEY_NAME })?;
        let base_image = required(entries, KEY_IMAGE)?;
        let work_dir = required(entries, KEY_WORK_DIR)?;

        if !work_dir.trim().is_empty() && !work_dir.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: KEY_WORK_DIR,
                message: format!("'{work_dir}' must be an absolute path"),
            });
        }

        let mut mounts = Vec::new();
        if let Some(value) = entries.get(KEY_MOUNTS) {
            for entry in split_list(value) {
                mounts.push(resolve_mount(entry.parse()?, config_dir));
            }
        }
        for entry in &overrides.mounts {
            mounts.push(resolve_mount(entry.parse()?, project_dir));
        }

        let mut ports = Vec::new();
        if let Some(value) = entries.get(KEY_PORTS) {
            for entry in split_list(value) {
                ports.push(entry.parse()?);
            }
        }
        for entry in &overrides.ports {
            ports.push(entry.parse()?);
        }

        let mut env_vars = BTreeMap::new();
        if let Some(value) = entries.get(KEY_ENV) {
            for entry in split_list(value) {
                let (key, value) = parse_env_var(entry)?;
                env_vars.insert(key, value);
            }
        }

        let persist_data = match entries.get(KEY_PERSIST) {
            Some(value) => parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
                key: KEY_PERSIST,
                message: format!("'{value}' is not true or false"),
            })?,
            None => false,
        };

        Ok(Self {
            name,
            base_image,
            work_dir,
            mounts,
            ports,
            env_vars,
            persist_data,
            nodejs_version: optional(entries, KEY_NODEJS),
            python_version: optional(entries, KEY_PYTHON),
            build_context: None,
        })
    }

    /// Build arguments forwarded to an image build.
    pub fn build_args(&self) -> HashMap<String, String> {
        let mut args = HashMap::new();
        if let Some(v) = &self.nodejs_version {
            args.insert(KEY_NODEJS.to_string(), v.clone());
        }
        if let Some(v) = &self.python_version {
            args.insert(KEY_PYTHON.to_string(), v.clone());
        }
        args
    }
}

fn read_entries(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let read_err = |source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut entries = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(read_err)? {
        let (key, value) = item.map_err(read_err)?;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn required(entries: &HashMap<String, String>, key: &'static str) -> Result<String, ConfigError> {
    entries
        .get(key)
        .cloned()
        .ok_or(ConfigError::MissingField { key })
}

fn optional(entries: &HashMap<String, String>, key: &str) -> Option<String> {
    entries
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Expands `~/` and anchors relative host paths at `base`.
fn resolve_mount(mut mount: Mount, base: &Path) -> Mount {
    let raw = mount.host_path.clone();
    if let Ok(rest) = raw.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            mount.host_path = home.join(rest);
        }
    } else if raw.is_relative() {
        mount.host_path = base.join(&raw);
    }
    mount
}
