use anyhow::Result;
use vext_cli::Cli;
use vext_extensions::execute_extension_run_hook_command;
use vext_package::{
    execute_extension_inspect_command, execute_extension_install_command,
    execute_extension_package_command, execute_extension_trust_command,
    execute_extension_verify_command,
};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    if !execute_startup_commands(&cli)? {
        println!("vext: no command requested (see --help)");
    }
    Ok(())
}

/// Runs every requested command in pipeline order. Returns false when none was requested.
pub(crate) fn execute_startup_commands(cli: &Cli) -> Result<bool> {
    let mut ran = false;

    if !cli.extension_trust_add.is_empty()
        || !cli.extension_trust_revoke.is_empty()
        || !cli.extension_trust_rotate.is_empty()
    {
        execute_extension_trust_command(cli)?;
        ran = true;
    }

    if cli.extension_package.is_some() {
        execute_extension_package_command(cli)?;
        ran = true;
    }

    if cli.extension_verify.is_some() {
        execute_extension_verify_command(cli)?;
        ran = true;
    }

    if cli.extension_inspect.is_some() {
        execute_extension_inspect_command(cli)?;
        ran = true;
    }

    if cli.extension_install.is_some() {
        execute_extension_install_command(cli)?;
        ran = true;
    }

    if cli.extension_run_hook.is_some() {
        execute_extension_run_hook_command(cli)?;
        ran = true;
    }

    Ok(ran)
}
