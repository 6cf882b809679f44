//! # SQL Lineage Analyzer
//!
//! View dependency and column calculation-chain analysis for SQL schemas.
//!
//! `sql-lineage-analyzer` reads a schema (DDL or a JSON/YAML/TOML catalog),
//! parses every view definition, builds the view dependency graph and
//! traces each view column back to the base table columns it is computed
//! from.
//!
//! # Quick Start
//!
//! ```bash
//! # Full report for a DDL schema
//! sql-lineage-analyzer analyze -s schema.sql --dialect postgresql
//!
//! # Calculation chain of one column
//! sql-lineage-analyzer trace -s catalog.json --relation order_totals --column total
//!
//! # Views that read a table, directly or indirectly
//! sql-lineage-analyzer deps -s schema.sql --relation orders --reverse
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from (in order of precedence):
//!
//! 1. Command-line arguments
//! 2. Environment variables (`SQL_LINEAGE_DIALECT`, `SQL_LINEAGE_FORMAT`, etc.)
//! 3. `.sql-lineage.toml` in current directory
//! 4. `~/.config/sql-lineage/config.toml`
//!
//! ## Example Configuration
//!
//! ```toml
//! [analysis]
//! dialect = "postgresql"
//! default_schema = "public"
//!
//! [output]
//! format = "text"
//! condense = true
//! ```
//!
//! # Exit Codes
//!
//! - `0` - Success, no issues or only informational messages
//! - `1` - Unresolved references found, or the schema could not be loaded
//! - `2` - Parse errors or dependency cycles found
//!
//! # Output Formats
//!
//! - `text` - Human-readable colored output (default)
//! - `json` - Structured JSON for programmatic processing
//! - `yaml` - YAML format

use std::process;

use clap::Parser;
use log::LevelFilter;
use sql_lineage_analyzer::{app::run, cli::Cli, config::Config, error::AppResult};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.command.common().verbose);
    match execute(&cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn execute(cli: &Cli) -> AppResult<i32> {
    let mut config = Config::load()?;
    if std::env::var_os("NO_COLOR").is_some() {
        config.output.color = false;
    }
    let output = run(cli, &config)?;
    println!("{}", output.stdout.trim_end());
    Ok(output.exit_code)
}

/// Warnings by default, debug with `-v`; `RUST_LOG` wins when set.
fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}
