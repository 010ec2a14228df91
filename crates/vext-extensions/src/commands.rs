use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use vext_cli::{Cli, CliDebugLevel};
use vext_runtime::{DebugLevel, HostMessageLevel, SandboxLimits};

use crate::{
    caller::CallerData,
    discovery::{parse_search_patterns, DiscoveryState},
    dispatch::{render_hook_report, DispatchOptions, HookDispatcher},
};

fn debug_level_from_cli(level: CliDebugLevel) -> DebugLevel {
    match level {
        CliDebugLevel::None => DebugLevel::None,
        CliDebugLevel::Tracing => DebugLevel::Tracing,
        CliDebugLevel::CrystalBall => DebugLevel::CrystalBall,
    }
}

fn caller_from_cli(cli: &Cli, cwd: PathBuf) -> CallerData {
    CallerData {
        source_path: PathBuf::new(),
        port: cli.extension_port.clone(),
        user: cli.extension_user.clone(),
        client: cli.extension_client.clone(),
        host: cli.extension_host.clone(),
        version: cli.extension_client_version.clone(),
        charset: cli.extension_charset.clone(),
        language: cli.extension_language.clone(),
        cwd,
        argv: cli.extension_hook_arg.clone(),
    }
}

pub fn execute_extension_run_hook_command(cli: &Cli) -> Result<()> {
    let Some(hook) = cli.extension_run_hook.as_deref() else {
        return Ok(());
    };
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let start_dir = cli
        .extension_start_dir
        .as_deref()
        .map(|dir| cwd.join(dir))
        .unwrap_or_else(|| cwd.clone());
    let options = DispatchOptions {
        limits: SandboxLimits::from_seconds_and_megabytes(
            cli.extension_max_time_secs,
            cli.extension_max_memory_mb,
        ),
        debug_level: debug_level_from_cli(cli.extension_debug_level),
        trace_dir: cli.extension_trace_dir.clone(),
        debug_hooks_enabled: cli.extension_debug_hooks,
        host_product: cli.extension_product.clone(),
    };

    let mut dispatcher = HookDispatcher::new(caller_from_cli(cli, cwd), options);
    for package_dir in &cli.extension_load {
        dispatcher.load_package(package_dir)?;
    }
    let mut state = DiscoveryState::new();
    let patterns = cli
        .extension_search
        .iter()
        .map(String::as_str)
        .flat_map(parse_search_patterns)
        .collect::<Vec<_>>();
    let loaded = dispatcher.load_scripts(
        &mut state,
        &patterns,
        &start_dir,
        cli.extension_search_parents,
    )?;
    tracing::debug!(
        hook,
        loose_scripts = loaded,
        directories_scanned = state.directories_scanned(),
        "client extensions ready"
    );

    let func = cli.extension_hook_func.as_deref().or(Some(hook));
    let outcome = dispatcher.run(hook, func, cli.extension_hook_no_replace);
    for message in &outcome.messages {
        match message.level {
            HostMessageLevel::Info => println!("{}", message.text),
            HostMessageLevel::Error => eprintln!("{}", message.text),
        }
    }
    println!("{}", render_hook_report(&outcome));
    if let Some(error) = outcome.error {
        bail!("extension hook '{hook}' failed: {error}");
    }
    Ok(())
}
