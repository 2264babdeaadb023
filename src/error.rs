//! Error taxonomy surfaced to the caller, with stable exit codes.
//!
//! Every command failure ends up as an [`AppError`]. `main` prints its
//! classification, cause and remedy and exits with [`AppError::code`], so
//! automation can branch on the exit status without parsing text.

use colored::Colorize;
use std::fmt::Write;

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::validate::ValidationError;

/// Closed set of result codes returned by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultCode {
    Success,
    InvalidArgs,
    /// Engine unreachable, or `shell` target missing / not running.
    PrerequisiteNotMet,
    ResourceConflict,
    InvalidPath,
    OperationFailure,
}

impl ResultCode {
    /// Process exit status for this code.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InvalidArgs => 1,
            Self::PrerequisiteNotMet => 2,
            Self::ResourceConflict => 3,
            Self::InvalidPath => 4,
            Self::OperationFailure => 5,
        }
    }
}

/// A failure reported to the user.
#[derive(Debug, thiserror::Error)]
pub(crate) enum AppError {
    /// Missing or malformed configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Name, path, port or secret check failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Container engine unreachable.
    #[error(transparent)]
    Prerequisite(EngineError),

    /// An engine call failed after validation passed.
    #[error("{message}")]
    Operation { message: String },

    /// Target environment does not exist.
    #[error("environment '{name}' not found")]
    NotFound { name: String },

    /// Target environment exists but is not running.
    #[error("environment '{name}' is not running")]
    NotRunning { name: String },
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        if err.is_unavailable() {
            return Self::Prerequisite(err);
        }
        match err {
            EngineError::NotFound { name } => Self::NotFound { name },
            other => Self::Operation {
                message: other.to_string(),
            },
        }
    }
}

impl AppError {
    /// Creates an `Operation` error.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    /// Result code for this failure.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Config(_) => ResultCode::InvalidArgs,
            Self::Validation(v) => v.code(),
            Self::Prerequisite(_) | Self::NotFound { .. } | Self::NotRunning { .. } => {
                ResultCode::PrerequisiteNotMet
            }
            Self::Operation { .. } => ResultCode::OperationFailure,
        }
    }

    /// One-word classification printed before the cause.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Validation(_) => "ValidationError",
            Self::Prerequisite(_) => "PrerequisiteError",
            Self::Operation { .. } => "OperationError",
            Self::NotFound { .. } => "NotFoundError",
            Self::NotRunning { .. } => "NotRunningError",
        }
    }

    /// Suggested remedy, when there is a common one.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Config(ConfigError::NotFound { .. } | ConfigError::MissingField { .. }) => {
                Some("agentbox init".to_string())
            }
            Self::Config(_) => Some("agentbox up --help".to_string()),
            Self::Validation(v) => v.hint(),
            Self::Prerequisite(_) => {
                Some("start Docker (or OrbStack) and check `docker info`".to_string())
            }
            Self::Operation { .. } => Some("re-run with --verbose for engine details".to_string()),
            Self::NotFound { .. } => Some("agentbox status".to_string()),
            Self::NotRunning { name } => {
                Some(format!("agentbox down {name} --force && agentbox up"))
            }
        }
    }
}

/// Formats an error as classification line, cause and optional remedy.
pub(crate) fn format_error(err: &AppError) -> String {
    let mut out = String::new();
    writeln!(
        &mut out,
        "{} {}: {}",
        "✗".red(),
        err.classification().red().bold(),
        err
    )
    .unwrap();
    if let Some(hint) = err.hint() {
        writeln!(&mut out, "  {} {}", "try:".dimmed(), hint.green()).unwrap();
    }
    out
}
