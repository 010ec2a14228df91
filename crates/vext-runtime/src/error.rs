use thiserror::Error;

use crate::{sandbox::SandboxError, DebugLevel};

/// Error raised while loading or calling into script code.
///
/// Sandbox-attributed failures are kept apart from failures the script caused
/// itself so callers can tell a slow or leaky extension from a broken one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("{0}")]
    Sandbox(#[from] SandboxError),
    #[error("Lua runtime error: {message}")]
    Runtime { message: String },
    #[error("callback returned bad data: {detail}")]
    BadReturn { detail: String },
    #[error("failed to read script {path}: {message}")]
    Load { path: String, message: String },
    #[error("debug level '{}' is not supported (maximum '{}')", requested.as_str(), supported.as_str())]
    UnsupportedDebugLevel {
        requested: DebugLevel,
        supported: DebugLevel,
    },
    #[error("internal script runtime error: {0}")]
    Internal(String),
}

impl ScriptError {
    /// Error taxonomy bucket used for operator-facing reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Sandbox(_) => "sandbox",
            Self::Runtime { .. } | Self::BadReturn { .. } => "script",
            Self::Load { .. } | Self::UnsupportedDebugLevel { .. } => "input",
            Self::Internal(_) => "internal",
        }
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self, Self::Sandbox(_))
    }
}
