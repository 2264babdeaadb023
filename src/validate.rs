//! Pre-flight checks run before any mutating engine call.
//!
//! Checks run in a fixed order and stop at the first failure: name format,
//! required fields, mount paths, name conflict, port availability, secret
//! format. The offline checks come first so they work without an engine.

use std::io::ErrorKind;
use std::net::{TcpListener, UdpSocket};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{EnvironmentConfig, Protocol};
use crate::engine::ContainerEngine;
use crate::error::{AppError, ResultCode};
use crate::secrets::Secret;

/// Longest accepted environment name.
const MAX_NAME_LEN: usize = 64;

/// A failed pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum ValidationError {
    #[error("invalid environment name '{name}': use 1-64 letters, digits or hyphens")]
    InvalidName { name: String },

    #[error("missing required field {field}")]
    MissingRequiredField { field: &'static str },

    #[error("mount path not found: {}", path.display())]
    MountPathNotFound { path: PathBuf },

    #[error("environment '{name}' already exists")]
    NameConflict { name: String },

    #[error("port {port} is already in use")]
    PortInUse { port: u16 },

    /// Never carries the secret value, only its position and key.
    #[error("invalid secret #{position}{}: expected KEY=VALUE with KEY matching [A-Za-z_][A-Za-z0-9_]*",
        key.as_deref().map(|k| format!(" ('{k}')")).unwrap_or_default())]
    InvalidSecretFormat { position: usize, key: Option<String> },
}

impl ValidationError {
    /// Result code for this failure kind.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::InvalidName { .. }
            | Self::MissingRequiredField { .. }
            | Self::InvalidSecretFormat { .. } => ResultCode::InvalidArgs,
            Self::MountPathNotFound { .. } => ResultCode::InvalidPath,
            Self::NameConflict { .. } | Self::PortInUse { .. } => ResultCode::ResourceConflict,
        }
    }

    /// Suggested remedy.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::InvalidName { .. } => Some("agentbox up --name my-env".to_string()),
            Self::MissingRequiredField { field } => Some(format!("set {field} in agentbox.env")),
            Self::MountPathNotFound { path } => Some(format!("mkdir -p {}", path.display())),
            Self::NameConflict { name } => Some(format!("agentbox down {name} --force")),
            Self::PortInUse { port } => {
                Some(format!("pick another host port than {port} with --port"))
            }
            Self::InvalidSecretFormat { .. } => Some("--secret API_KEY=value".to_string()),
        }
    }
}

/// Host-side facts the validator needs.
pub(crate) trait HostProbe: Send + Sync {
    /// Returns true if `path` exists on this host.
    fn path_exists(&self, path: &Path) -> bool;

    /// Returns true if another process holds `port`.
    fn port_in_use(&self, port: u16, protocol: Protocol) -> bool;
}

/// Probe backed by the real filesystem and network stack.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemProbe;

impl HostProbe for SystemProbe {
    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn port_in_use(&self, port: u16, protocol: Protocol) -> bool {
        let result = match protocol {
            Protocol::Tcp => TcpListener::bind(("0.0.0.0", port)).map(drop),
            Protocol::Udp => UdpSocket::bind(("0.0.0.0", port)).map(drop),
        };
        // Only a held address counts; privileged ports fail with EACCES.
        matches!(result, Err(e) if e.kind() == ErrorKind::AddrInUse)
    }
}

/// Returns true if `name` matches `[A-Za-z0-9-]{1,64}`.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Checks a config and raw secret flags against the host and the engine.
pub(crate) struct Validator<'a> {
    engine: &'a dyn ContainerEngine,
    probe: &'a dyn HostProbe,
}

impl<'a> Validator<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, probe: &'a dyn HostProbe) -> Self {
        Self { engine, probe }
    }

    /// Runs every check in order. On success returns the parsed secrets.
    ///
    /// Engine failures while querying names or ports surface as
    /// [`AppError::Prerequisite`].
    pub async fn validate(
        &self,
        config: &EnvironmentConfig,
        raw_secrets: &[String],
    ) -> Result<Vec<Secret>, AppError> {
        check_offline(config, self.probe)?;

        self.engine.ping().await?;

        if !self.engine.list_by_name(&config.name).await?.is_empty() {
            return Err(ValidationError::NameConflict {
                name: config.name.clone(),
            }
            .into());
        }

        let published = self.engine.published_ports().await?;
        let mut seen = Vec::new();
        for port in &config.ports {
            let key = (port.host_port, port.protocol);
            let taken = seen.contains(&key)
                || published.contains(&key)
                || self.probe.port_in_use(port.host_port, port.protocol);
            if taken {
                return Err(ValidationError::PortInUse {
                    port: port.host_port,
                }
                .into());
            }
            seen.push(key);
        }

        let secrets = parse_secrets(raw_secrets)?;
        debug!("Validation passed for {}", config.name);
        Ok(secrets)
    }
}

/// Name, required-field and mount checks; no engine needed.
pub(crate) fn check_offline(
    config: &EnvironmentConfig,
    probe: &dyn HostProbe,
) -> Result<(), ValidationError> {
    if !is_valid_name(&config.name) {
        return Err(ValidationError::InvalidName {
            name: config.name.clone(),
        });
    }
    if config.base_image.trim().is_empty() {
        return Err(ValidationError::MissingRequiredField {
            field: "BASE_IMAGE",
        });
    }
    if config.work_dir.trim().is_empty() {
        return Err(ValidationError::MissingRequiredField { field: "WORK_DIR" });
    }
    if let Some(mount) = config
        .mounts
        .iter()
        .find(|m| !probe.path_exists(&m.host_path))
    {
        return Err(ValidationError::MountPathNotFound {
            path: mount.host_path.clone(),
        });
    }
    Ok(())
}

/// Parses every raw `KEY=VALUE` secret flag.
pub(crate) fn parse_secrets(raw: &[String]) -> Result<Vec<Secret>, ValidationError> {
    raw.iter()
        .enumerate()
        .map(|(i, entry)| {
            Secret::parse(entry).ok_or_else(|| ValidationError::InvalidSecretFormat {
                position: i + 1,
                key: entry
                    .split_once('=')
                    .map(|(k, _)| k.to_string())
                    .filter(|k| !k.is_empty()),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{Mount, MountMode, PortMapping};
    use crate::engine::fake::FakeEngine;
    use crate::engine::{ContainerSpec, InstanceStatus};
    use std::collections::{BTreeMap, HashSet};

    /// Probe with a fixed set of existing paths and busy ports.
    #[derive(Debug, Default)]
    pub(crate) struct StaticProbe {
        pub paths: HashSet<PathBuf>,
        pub busy_ports: HashSet<u16>,
    }

    impl StaticProbe {
        pub fn with_path(mut self, path: &str) -> Self {
            self.paths.insert(PathBuf::from(path));
            self
        }

        pub fn with_busy_port(mut self, port: u16) -> Self {
            self.busy_ports.insert(port);
            self
        }
    }

    impl HostProbe for StaticProbe {
        fn path_exists(&self, path: &Path) -> bool {
            self.paths.contains(path)
        }

        fn port_in_use(&self, port: u16, _protocol: Protocol) -> bool {
            self.busy_ports.contains(&port)
        }
    }

    pub(crate) fn demo_config() -> EnvironmentConfig {
        EnvironmentConfig {
            name: "demo".to_string(),
            base_image: "agentbox:latest".to_string(),
            work_dir: "/workspace".to_string(),
            mounts: vec![Mount {
                host_path: PathBuf::from("/src"),
                container_path: "/workspace".to_string(),
                mode: MountMode::ReadWrite,
            }],
            ports: Vec::new(),
            env_vars: BTreeMap::new(),
            persist_data: false,
            nodejs_version: None,
            python_version: None,
            build_context: None,
        }
    }

    fn port(host: u16) -> PortMapping {
        PortMapping {
            host_port: host,
            container_port: host,
            protocol: Protocol::Tcp,
        }
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("demo"));
        assert!(is_valid_name("my-env-2"));
        assert!(is_valid_name(&"a".repeat(64)));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(&"a".repeat(65)));
        assert!(!is_valid_name("under_score"));
        assert!(!is_valid_name("has space"));
    }

    #[tokio::test]
    async fn test_valid_config_passes() {
        let engine = FakeEngine::new();
        let probe = StaticProbe::default().with_path("/src");
        let secrets = Validator::new(&engine, &probe)
            .validate(&demo_config(), &["API_KEY=abc123".to_string()])
            .await
            .unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].key(), "API_KEY");
    }

    #[tokio::test]
    async fn test_invalid_name_checked_first() {
        let engine = FakeEngine::new().unreachable();
        let probe = StaticProbe::default();
        let mut config = demo_config();
        config.name = "bad name".to_string();

        let err = Validator::new(&engine, &probe)
            .validate(&config, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::InvalidName { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_required_fields() {
        let engine = FakeEngine::new();
        let probe = StaticProbe::default().with_path("/src");

        let mut config = demo_config();
        config.base_image = "  ".to_string();
        let err = Validator::new(&engine, &probe)
            .validate(&config, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::MissingRequiredField { field: "BASE_IMAGE" })
        ));

        let mut config = demo_config();
        config.work_dir = String::new();
        let err = Validator::new(&engine, &probe)
            .validate(&config, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::MissingRequiredField { field: "WORK_DIR" })
        ));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_mount_path() {
        let engine = FakeEngine::new();
        let probe = StaticProbe::default();
        let err = Validator::new(&engine, &probe)
            .validate(&demo_config(), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::MountPathNotFound { .. })
        ));
        assert_eq!(err.code(), ResultCode::InvalidPath);
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_prerequisite_error() {
        let engine = FakeEngine::new().unreachable();
        let probe = StaticProbe::default().with_path("/src");
        let err = Validator::new(&engine, &probe)
            .validate(&demo_config(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ResultCode::PrerequisiteNotMet);
    }

    #[tokio::test]
    async fn test_name_conflict() {
        let engine = FakeEngine::new().with_container("demo", InstanceStatus::Stopped);
        let probe = StaticProbe::default().with_path("/src");
        let err = Validator::new(&engine, &probe)
            .validate(&demo_config(), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::NameConflict { .. })
        ));
        assert_eq!(err.code(), ResultCode::ResourceConflict);
    }

    #[tokio::test]
    async fn test_port_in_use_on_host() {
        let engine = FakeEngine::new();
        let probe = StaticProbe::default().with_path("/src").with_busy_port(3000);
        let mut config = demo_config();
        config.ports = vec![port(8080), port(3000)];

        let err = Validator::new(&engine, &probe)
            .validate(&config, &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3000"));
        assert_eq!(err.code(), ResultCode::ResourceConflict);
    }

    #[tokio::test]
    async fn test_duplicate_port_in_config() {
        let engine = FakeEngine::new();
        let probe = StaticProbe::default().with_path("/src");
        let mut config = demo_config();
        config.ports = vec![port(8080), port(8080)];

        let err = Validator::new(&engine, &probe)
            .validate(&config, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::PortInUse { port: 8080 })
        ));
    }

    #[tokio::test]
    async fn test_same_host_port_on_both_protocols() {
        let engine = FakeEngine::new();
        let probe = StaticProbe::default().with_path("/src");
        let mut config = demo_config();
        config.ports = vec!["5353:53/tcp".parse().unwrap(), "5353:53/udp".parse().unwrap()];

        Validator::new(&engine, &probe)
            .validate(&config, &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_published_port_conflicts_only_on_same_protocol() {
        let engine = FakeEngine::new().with_image("agentbox:latest");
        let probe = StaticProbe::default().with_path("/src");
        let mut dns = demo_config();
        dns.name = "dns".to_string();
        dns.ports = vec!["5353:53/udp".parse().unwrap()];
        let spec = ContainerSpec {
            name: dns.name.clone(),
            image: dns.base_image.clone(),
            ports: dns.ports.clone(),
            ..Default::default()
        };
        engine.create(&spec).await.unwrap();
        engine.start("dns").await.unwrap();

        let mut config = demo_config();
        config.ports = vec!["5353:5353/tcp".parse().unwrap()];
        Validator::new(&engine, &probe)
            .validate(&config, &[])
            .await
            .unwrap();

        config.ports = vec!["5353:5353/udp".parse().unwrap()];
        let err = Validator::new(&engine, &probe)
            .validate(&config, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::PortInUse { port: 5353 })
        ));
    }

    #[test]
    fn test_parse_secrets_reports_position_not_value() {
        let raw = vec!["OK=1".to_string(), "9BAD=topsecret".to_string()];
        let err = parse_secrets(&raw).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidSecretFormat {
                position: 2,
                key: Some("9BAD".to_string())
            }
        );
        assert!(!err.to_string().contains("topsecret"));
    }

    #[test]
    fn test_parse_secrets_accepts_empty_value() {
        let secrets = parse_secrets(&["KEY=".to_string()]).unwrap();
        assert_eq!(secrets[0].key(), "KEY");
    }

    #[test]
    fn test_parse_secrets_without_equals() {
        let err = parse_secrets(&["JUSTAVALUE".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidSecretFormat { position: 1, key: None }
        ));
    }

    #[test]
    fn test_system_probe_detects_bound_port() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(SystemProbe.port_in_use(port, Protocol::Tcp));
    }
}
