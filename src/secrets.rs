//! Secrets passed on the command line and injected as container environment.
//!
//! Values live in [`SecretString`] so they never show up in `Debug` output,
//! and are only exposed when the engine's env assignments are built.

use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::config::is_identifier;

/// A credential injected into the container at creation time.
pub(crate) struct Secret {
    key: String,
    value: SecretString,
}

impl Secret {
    /// Parses a raw `KEY=VALUE` flag. Returns `None` when the shape or key is
    /// invalid. An empty value is allowed.
    pub fn parse(raw: &str) -> Option<Self> {
        let (key, value) = raw.split_once('=')?;
        if !is_identifier(key) {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            value: SecretString::new(value.to_string()),
        })
    }

    /// The variable name.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("key", &self.key)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Builds the `KEY=VALUE` assignments for container creation.
///
/// Non-secret variables come first; a secret with the same key wins because
/// the engine applies later assignments over earlier ones.
pub(crate) fn env_assignments(
    env_vars: &BTreeMap<String, String>,
    secrets: &[Secret],
) -> Vec<String> {
    let mut env: Vec<String> = env_vars.iter().map(|(k, v)| format!("{k}={v}")).collect();

    for secret in secrets {
        debug!("Injecting secret {}", secret.key());
        env.push(format!("{}={}", secret.key, secret.value.expose_secret()));
    }

    env
}
