mod bootstrap_helpers;
mod startup_dispatch;

use anyhow::Result;
use clap::Parser;
use vext_cli::Cli;

use crate::bootstrap_helpers::init_tracing;
use crate::startup_dispatch::run_cli;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli)
}
