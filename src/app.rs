//! Application logic for the SQL Lineage Analyzer CLI.
//!
//! This module contains the command logic separated from the main entry
//! point to enable testing.

mod commands;
mod convert;
mod helpers;
mod types;

pub use commands::{run_analyze, run_deps, run_trace};
pub use convert::{convert_dialect, convert_format};
pub use helpers::{load_schema, resolve_settings, start_spinner};
pub use types::{CommandOutput, Settings};

use crate::{
    cli::{Cli, Commands},
    config::Config,
    error::AppResult
};

/// Dispatch a parsed command line.
pub fn run(cli: &Cli, config: &Config) -> AppResult<CommandOutput> {
    match &cli.command {
        Commands::Analyze {
            common
        } => run_analyze(common, config),
        Commands::Trace {
            common,
            relation,
            column
        } => run_trace(common, config, relation, column.as_deref()),
        Commands::Deps {
            common,
            relation,
            reverse
        } => run_deps(common, config, relation, *reverse)
    }
}
