//! CLI argument models shared by the vext binary and command surfaces.
//!
//! Every flag carries an `env` fallback so hosts can configure extension
//! behavior without changing the command line.

pub mod cli_args;
pub mod cli_types;

pub use cli_args::Cli;
pub use cli_types::*;
