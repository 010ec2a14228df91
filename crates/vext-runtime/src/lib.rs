//! Sandboxed script runtime for vext extensions.
//!
//! Provides the `ScriptRuntime` trait, the Lua 5.3 execution context with
//! time/memory budgets and cooperative instruction-count preemption, optional
//! per-line debug tracing, and the host bindings visible to scripts.

pub mod bindings;
pub mod error;
pub mod lua53;
pub mod sandbox;
pub mod trace;
pub mod value;

use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

pub use bindings::{HostContext, HostMessage, HostMessageLevel, SCRIPT_ACTION_CONSTANTS};
pub use error::ScriptError;
pub use lua53::Lua53Runtime;
pub use sandbox::{
    SandboxBudget, SandboxError, SandboxLimits, SANDBOX_BYTES_PER_MEGABYTE,
    SANDBOX_CONTEXT_CANCELLED_REASON_CODE, SANDBOX_INSTRUCTION_CHECKPOINT_INTERVAL,
    SANDBOX_MEMORY_EXCEEDED_REASON_CODE, SANDBOX_TIME_EXCEEDED_REASON_CODE,
};
pub use trace::{DebugLevel, TraceLog, DEBUG_TRACE_FILE_NAME};
pub use value::ScriptValue;

/// API version handed to loose client scripts.
pub const SCRIPT_API_VERSION_DEFAULT: u32 = 20191;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Embedded language/version pairs the host can execute.
pub enum ScriptVersion {
    Lua53,
}

impl ScriptVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lua53 => "lua-53",
        }
    }

    /// Resolves the `<version>.<language>` suffix of a loose script file name.
    pub fn from_file_tags(version_tag: &str, language_tag: &str) -> Option<Self> {
        match (version_tag, language_tag) {
            ("53", "lua") => Some(Self::Lua53),
            _ => None,
        }
    }

    /// Resolves the `script_runtime` pair declared in an extension manifest.
    pub fn from_manifest(language: &str, version: &str) -> Option<Self> {
        match (language, version) {
            ("Lua", "5.3") => Some(Self::Lua53),
            _ => None,
        }
    }

    pub fn implementation_name(&self) -> &'static str {
        match self {
            Self::Lua53 => "Lua",
        }
    }

    pub fn implementation_version(&self) -> &'static str {
        match self {
            Self::Lua53 => "5.3.6",
        }
    }

    /// Entry-point file name used inside extension archives.
    pub fn main_file_name(&self) -> &'static str {
        match self {
            Self::Lua53 => "main.lua",
        }
    }

    pub fn max_debug_level(&self) -> DebugLevel {
        match self {
            Self::Lua53 => DebugLevel::Tracing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Construction options for one execution context.
pub struct RuntimeOptions {
    pub api_version: u32,
    pub limits: SandboxLimits,
    pub debug_level: DebugLevel,
    pub trace_dir: PathBuf,
    pub context_id: String,
    pub host: HostContext,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            api_version: SCRIPT_API_VERSION_DEFAULT,
            limits: SandboxLimits::default(),
            debug_level: DebugLevel::None,
            trace_dir: PathBuf::from("."),
            context_id: "0".to_string(),
            host: HostContext::default(),
        }
    }
}

/// One embedded-language execution context bound to a single extension.
pub trait ScriptRuntime {
    fn script_version(&self) -> ScriptVersion;
    fn api_version(&self) -> u32;
    fn load_file(&mut self, path: &Path) -> Result<(), ScriptError>;
    fn load_source(&mut self, chunk_name: &str, source: &str) -> Result<(), ScriptError>;
    fn function_exists(&self, name: &str) -> bool;
    /// Calls a global function with no arguments. `Ok(None)` means nothing was returned.
    fn call_function(&mut self, name: &str) -> Result<Option<ScriptValue>, ScriptError>;
    fn set_call_context(&mut self, hook: &str, func: Option<&str>);
    fn disable_extension_binding(&mut self);
    fn extension_binding_enabled(&self) -> bool;
    fn take_messages(&mut self) -> Vec<HostMessage>;
    fn elapsed(&self) -> Duration;
    fn memory_in_use(&self) -> usize;
    fn is_cancelled(&self) -> bool;
}

/// Instantiates the execution context for `version`.
pub fn create_runtime(
    version: ScriptVersion,
    options: RuntimeOptions,
) -> Result<Box<dyn ScriptRuntime>, ScriptError> {
    match version {
        ScriptVersion::Lua53 => Ok(Box::new(Lua53Runtime::new(options)?)),
    }
}

#[cfg(test)]
mod tests;
