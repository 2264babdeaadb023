//! Domain-specific error types for container engine operations.
//!
//! Typed errors let the lifecycle controller and shell gateway branch on
//! the failure mode (engine down, container missing, start timeout) instead
//! of parsing message strings.

use std::time::Duration;

/// Errors that can occur while talking to the container engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine daemon is not running or not reachable.
    #[error("container engine is not available: {message}")]
    Unavailable { message: String },

    /// No container with this name exists.
    #[error("environment '{name}' not found")]
    NotFound { name: String },

    /// Image could neither be found locally nor pulled/built.
    #[error("container image not found: {image}")]
    ImageNotFound { image: String },

    /// The container did not reach the running state in time.
    #[error("container did not start within {timeout_secs} seconds")]
    StartTimeout { timeout_secs: u64 },

    /// An engine call failed after reaching the daemon.
    #[error("{operation} failed: {message}")]
    OperationFailed {
        operation: &'static str,
        message: String,
    },
}

impl EngineError {
    /// Creates an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `StartTimeout` error from a `Duration`.
    pub fn start_timeout(duration: Duration) -> Self {
        Self::StartTimeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates an `OperationFailed` error.
    pub fn failed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation,
            message: message.into(),
        }
    }

    /// Returns true if the engine could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Returns true if the target container does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
