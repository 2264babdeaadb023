//! Files written by `agentbox init`.

/// Default `agentbox.env` environment definition.
pub(crate) const AGENTBOX_ENV: &str = include_str!("agentbox.env");

/// Node.js + Python image definition.
pub(crate) const DOCKERFILE: &str = include_str!("Dockerfile");

/// Diagnostic script installed in the image as `agentbox-info`.
pub(crate) const INFO_SCRIPT: &str = include_str!("agentbox-info.sh");
