//! Loose-script discovery and hook dispatch for client extensions.
//!
//! Finds `name.<version>.<language>` scripts along the configured search
//! patterns, binds each one to its own sandboxed execution context, and runs
//! named hooks across the loaded extensions in load order.

pub mod action;
pub mod caller;
pub mod commands;
pub mod discovery;
pub mod dispatch;

pub use action::ClientScriptAction;
pub use caller::CallerData;
pub use commands::execute_extension_run_hook_command;
pub use discovery::{
    find_loose_scripts, parse_search_patterns, script_version_from_file_name, DiscoveredScript,
    DiscoveryState,
};
pub use dispatch::{
    render_hook_report, DispatchError, DispatchOptions, HookDispatcher, HookOutcome,
    LoadedExtension,
};

#[cfg(test)]
mod tests;
