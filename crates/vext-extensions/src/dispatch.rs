//! Hook dispatch across loaded extensions.

use std::path::{Path, PathBuf};

use thiserror::Error;
use vext_package::{ExtensionPackage, PackageError, LEGACY_COMPATIBLE_PRODUCT};
use vext_runtime::{
    create_runtime, DebugLevel, HostContext, HostMessage, RuntimeOptions, SandboxLimits,
    ScriptError, ScriptRuntime, ScriptVersion, SCRIPT_API_VERSION_DEFAULT,
};

use crate::{
    action::ClientScriptAction,
    caller::CallerData,
    discovery::{find_loose_scripts, DiscoveryState},
};

/// Failure attributed to one extension while loading it or running a hook.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("client extension ({path}) failed: {source}")]
    RuntimeFailure { path: String, source: ScriptError },
    #[error("client extension ({path}) failed: no return from callback")]
    NoReturn { path: String },
    #[error("command rejected in '{hook}' by client extension ({path})")]
    Rejected { hook: String, path: String },
    #[error("client extension ({path}) can't return REPLACE for the {hook} hook")]
    IllegalReplace { hook: String, path: String },
    #[error("client extension ({path}) callback returned bad data: cb: '{hook}', err: {detail}")]
    BadData {
        hook: String,
        path: String,
        detail: String,
    },
    #[error("client extension ({path}) returned unknown action {value} for {hook}")]
    UnknownAction {
        hook: String,
        path: String,
        value: i64,
    },
    #[error("failed to load client extension ({path}): {source}")]
    Load { path: String, source: ScriptError },
    #[error("failed to load extension package ({path}): {source}")]
    Package { path: String, source: PackageError },
    #[error("internal dispatch error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Error taxonomy bucket used for operator-facing reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RuntimeFailure { source, .. } | Self::Load { source, .. } => source.category(),
            Self::Package { source, .. } => source.category(),
            Self::Internal(_) => "internal",
            _ => "script",
        }
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self, Self::RuntimeFailure { source, .. } if source.is_sandbox())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `DispatchOptions` used across vext components.
pub struct DispatchOptions {
    pub limits: SandboxLimits,
    pub debug_level: DebugLevel,
    pub trace_dir: Option<PathBuf>,
    pub debug_hooks_enabled: bool,
    /// Product tag packages must list in `compatible_products` before they are loaded.
    pub host_product: String,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            limits: SandboxLimits::default(),
            debug_level: DebugLevel::None,
            trace_dir: None,
            debug_hooks_enabled: false,
            host_product: LEGACY_COMPATIBLE_PRODUCT.to_string(),
        }
    }
}

/// One extension bound to its own execution context.
pub struct LoadedExtension {
    pub source_path: PathBuf,
    pub name: Option<String>,
    runtime: Box<dyn ScriptRuntime>,
}

#[derive(Debug)]
/// Result of running one hook: the action, how many extensions ran, and why it stopped.
pub struct HookOutcome {
    pub hook: String,
    pub action: ClientScriptAction,
    pub extensions_run: usize,
    pub error: Option<DispatchError>,
    pub messages: Vec<HostMessage>,
}

impl HookOutcome {
    fn stop(mut self, action: ClientScriptAction, error: Option<DispatchError>) -> Self {
        self.action = action;
        self.error = error;
        self
    }
}

/// Loaded extensions for one command invocation, in load order.
pub struct HookDispatcher {
    caller: CallerData,
    options: DispatchOptions,
    extensions: Vec<LoadedExtension>,
}

impl HookDispatcher {
    pub fn new(caller: CallerData, options: DispatchOptions) -> Self {
        Self {
            caller,
            options,
            extensions: Vec::new(),
        }
    }

    pub fn extensions(&self) -> &[LoadedExtension] {
        &self.extensions
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    fn runtime_options(&self, path: &Path, api_version: u32) -> RuntimeOptions {
        let host = HostContext {
            vars: self.caller.for_script(path).host_vars(),
            argv: self.caller.argv.clone(),
            ..HostContext::default()
        };
        RuntimeOptions {
            api_version,
            limits: self.options.limits,
            debug_level: self.options.debug_level,
            trace_dir: self
                .options
                .trace_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            context_id: format!("{}-{}", std::process::id(), self.extensions.len()),
            host,
        }
    }

    fn load_into_context(
        &mut self,
        path: &Path,
        version: ScriptVersion,
        api_version: u32,
        name: Option<String>,
    ) -> Result<(), DispatchError> {
        let load_error = |source: ScriptError| DispatchError::Load {
            path: path.display().to_string(),
            source,
        };
        let mut runtime =
            create_runtime(version, self.runtime_options(path, api_version)).map_err(load_error)?;
        runtime.disable_extension_binding();
        runtime.load_file(path).map_err(load_error)?;
        tracing::debug!(
            path = %path.display(),
            version = version.as_str(),
            position = self.extensions.len(),
            "loaded client extension"
        );
        self.extensions.push(LoadedExtension {
            source_path: path.to_path_buf(),
            name,
            runtime,
        });
        Ok(())
    }

    /// Loads a single loose script.
    pub fn load_script(&mut self, path: &Path, version: ScriptVersion) -> Result<(), DispatchError> {
        self.load_into_context(path, version, SCRIPT_API_VERSION_DEFAULT, None)
    }

    /// Discovers and loads every loose script matching `patterns`.
    ///
    /// Returns the number of scripts loaded. Loading stops at the first failure.
    pub fn load_scripts(
        &mut self,
        state: &mut DiscoveryState,
        patterns: &[String],
        start_dir: &Path,
        search_parents: bool,
    ) -> Result<usize, DispatchError> {
        let scripts = find_loose_scripts(state, patterns, start_dir, search_parents);
        for script in &scripts {
            self.load_script(&script.path, script.version)?;
        }
        Ok(scripts.len())
    }

    /// Loads the entry point of an unpacked or installed extension package.
    ///
    /// The package must be compatible with the configured host product and
    /// declare a known API version; nothing from it runs otherwise.
    pub fn load_package(&mut self, package_dir: &Path) -> Result<(), DispatchError> {
        let package_error = |source: PackageError| DispatchError::Package {
            path: package_dir.display().to_string(),
            source,
        };
        let package = ExtensionPackage::from_dir(package_dir, 1).map_err(package_error)?;
        if let Err(source) = package.check_compatibility(&self.options.host_product) {
            tracing::warn!(
                package = %package_dir.display(),
                host_product = %self.options.host_product,
                error = %source,
                "refusing incompatible extension package"
            );
            return Err(package_error(source));
        }
        self.load_into_context(
            &package.script_path(),
            package.manifest.runtime,
            package.manifest.api_version,
            Some(package.identity.full_name()),
        )
    }

    /// Runs `hook` in load order.
    ///
    /// Extensions without a `hook` callback are skipped and not counted. A
    /// sandbox cancellation is reported in preference to the script's own
    /// failure, and either is reported in preference to a bad return value.
    pub fn run(&mut self, hook: &str, func: Option<&str>, no_replace: bool) -> HookOutcome {
        let mut outcome = HookOutcome {
            hook: hook.to_string(),
            action: ClientScriptAction::Pass,
            extensions_run: 0,
            error: None,
            messages: Vec::new(),
        };

        for extension in &mut self.extensions {
            if !extension.runtime.function_exists(hook) {
                continue;
            }
            outcome.extensions_run += 1;
            extension.runtime.set_call_context(hook, func);
            let result = extension.runtime.call_function(hook);
            outcome.messages.extend(extension.runtime.take_messages());

            let path = extension.source_path.display().to_string();
            let value = match result {
                Ok(Some(value)) => value,
                Ok(None) => {
                    tracing::warn!(path = %path, hook, "client extension returned nothing");
                    return outcome.stop(
                        ClientScriptAction::Fail,
                        Some(DispatchError::NoReturn { path }),
                    );
                }
                Err(ScriptError::BadReturn { detail }) => {
                    return outcome.stop(
                        ClientScriptAction::Fail,
                        Some(DispatchError::BadData {
                            hook: hook.to_string(),
                            path,
                            detail,
                        }),
                    );
                }
                Err(source) => {
                    tracing::warn!(
                        path = %path,
                        hook,
                        category = source.category(),
                        error = %source,
                        "client extension failed"
                    );
                    return outcome.stop(
                        ClientScriptAction::Fail,
                        Some(DispatchError::RuntimeFailure { path, source }),
                    );
                }
            };

            let Some(raw) = value.as_int() else {
                return outcome.stop(
                    ClientScriptAction::Fail,
                    Some(DispatchError::BadData {
                        hook: hook.to_string(),
                        path,
                        detail: format!("expected an action number, got {}", value.kind()),
                    }),
                );
            };
            let action = ClientScriptAction::from_value(raw);
            tracing::debug!(
                path = %path,
                hook,
                action = action.map(|action| action.as_str()).unwrap_or("UNKNOWN"),
                "client extension returned"
            );
            match action {
                Some(ClientScriptAction::Pass) => continue,
                Some(ClientScriptAction::Fail) => {
                    return outcome.stop(
                        ClientScriptAction::Fail,
                        Some(DispatchError::Rejected {
                            hook: hook.to_string(),
                            path,
                        }),
                    );
                }
                Some(ClientScriptAction::Replace) if no_replace => {
                    return outcome.stop(
                        ClientScriptAction::Fail,
                        Some(DispatchError::IllegalReplace {
                            hook: hook.to_string(),
                            path,
                        }),
                    );
                }
                Some(action) if !action.is_debug_gated() || self.options.debug_hooks_enabled => {
                    return outcome.stop(action, None);
                }
                _ => {
                    return outcome.stop(
                        ClientScriptAction::Unknown,
                        Some(DispatchError::UnknownAction {
                            hook: hook.to_string(),
                            path,
                            value: raw,
                        }),
                    );
                }
            }
        }
        outcome
    }
}

pub fn render_hook_report(outcome: &HookOutcome) -> String {
    let error = outcome
        .error
        .as_ref()
        .map(|error| format!("{} ({})", error, error.category()))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "extension hook: hook={} action={} extensions_run={} messages={} error={}",
        outcome.hook,
        outcome.action.as_str(),
        outcome.extensions_run,
        outcome.messages.len(),
        error
    )
}
