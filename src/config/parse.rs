//! Typed parsers for the list-valued configuration entries.
//!
//! Mount, port and environment-variable entries arrive as comma-separated
//! strings (`HOST_MOUNTS`, `PORTS`, `ENVIRONMENT_VARS`) or as repeated CLI
//! flags. Each entry is parsed into its record here; malformed entries are
//! rejected with a [`ParseError`] naming the offending text.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A malformed list entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Mount entry does not have 2 or 3 colon-separated fields.
    #[error("invalid mount '{entry}': expected host:container[:ro|rw]")]
    MountShape { entry: String },

    /// Mount mode is neither `ro` nor `rw`.
    #[error("invalid mount mode '{mode}' in '{entry}': expected ro or rw")]
    MountMode { entry: String, mode: String },

    /// Container side of a mount is not an absolute path.
    #[error("invalid mount '{entry}': container path must be absolute")]
    MountTarget { entry: String },

    /// Port entry does not have exactly 2 colon-separated fields.
    #[error("invalid port mapping '{entry}': expected host:container[/tcp|udp]")]
    PortShape { entry: String },

    /// Port number outside 1..=65535 or not a number.
    #[error("invalid port '{value}' in '{entry}': must be between 1 and 65535")]
    PortRange { entry: String, value: String },

    /// Unknown port protocol.
    #[error("invalid protocol '{protocol}' in '{entry}': expected tcp or udp")]
    Protocol { entry: String, protocol: String },

    /// Environment variable entry is not `KEY=VALUE` with a valid key.
    #[error("invalid environment variable '{entry}': expected KEY=VALUE")]
    EnvVar { entry: String },
}

/// Access mode of a bind mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MountMode {
    /// Read-only inside the container.
    ReadOnly,
    /// Read-write inside the container.
    #[default]
    ReadWrite,
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "ro"),
            Self::ReadWrite => write!(f, "rw"),
        }
    }
}

/// A host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Path on the invoking host.
    pub host_path: PathBuf,
    /// Absolute path inside the container.
    pub container_path: String,
    /// Access mode.
    pub mode: MountMode,
}

impl Mount {
    /// Formats the mount as an engine bind spec (`host:container:mode`).
    pub fn bind_spec(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            self.mode
        )
    }
}

impl FromStr for Mount {
    type Err = ParseError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = entry.split(':').map(str::trim).collect();
        let (host, container, mode) = match fields.as_slice() {
            [host, container] => (*host, *container, MountMode::ReadWrite),
            [host, container, mode] => {
                let mode = match *mode {
                    "ro" => MountMode::ReadOnly,
                    "rw" => MountMode::ReadWrite,
                    other => {
                        return Err(ParseError::MountMode {
                            entry: entry.to_string(),
                            mode: other.to_string(),
                        })
                    }
                };
                (*host, *container, mode)
            }
            _ => {
                return Err(ParseError::MountShape {
                    entry: entry.to_string(),
                })
            }
        };

        if host.is_empty() || container.is_empty() {
            return Err(ParseError::MountShape {
                entry: entry.to_string(),
            });
        }
        if !container.starts_with('/') {
            return Err(ParseError::MountTarget {
                entry: entry.to_string(),
            });
        }

        Ok(Self {
            host_path: PathBuf::from(host),
            container_path: container.to_string(),
            mode,
        })
    }
}

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    /// TCP (default).
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// A host port published to a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port bound on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl PortMapping {
    /// Key used by the engine for exposed ports and bindings (`3000/tcp`).
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.host_port, self.container_port, self.protocol
        )
    }
}

impl FromStr for PortMapping {
    type Err = ParseError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let (ports, protocol) = match entry.split_once('/') {
            Some((ports, proto)) => {
                let protocol = match proto.trim().to_lowercase().as_str() {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    _ => {
                        return Err(ParseError::Protocol {
                            entry: entry.to_string(),
                            protocol: proto.to_string(),
                        })
                    }
                };
                (ports, protocol)
            }
            None => (entry, Protocol::Tcp),
        };

        let fields: Vec<&str> = ports.split(':').map(str::trim).collect();
        let [host, container] = fields.as_slice() else {
            return Err(ParseError::PortShape {
                entry: entry.to_string(),
            });
        };

        Ok(Self {
            host_port: parse_port_number(entry, host)?,
            container_port: parse_port_number(entry, container)?,
            protocol,
        })
    }
}

fn parse_port_number(entry: &str, value: &str) -> Result<u16, ParseError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ParseError::PortRange {
            entry: entry.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parses a non-secret `KEY=VALUE` environment entry.
pub fn parse_env_var(entry: &str) -> Result<(String, String), ParseError> {
    match entry.split_once('=') {
        Some((key, value)) if is_identifier(key.trim()) => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ParseError::EnvVar {
            entry: entry.to_string(),
        }),
    }
}

/// Splits a comma-separated list, dropping blank entries.
pub fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Returns true if `s` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
