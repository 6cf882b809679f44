use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// SQL Lineage Analyzer - View dependencies and column calculation chains
#[derive(Parser, Debug)]
#[command(name = "sql-lineage-analyzer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze every view of a schema
    Analyze {
        #[command(flatten)]
        common: CommonArgs
    },

    /// Show calculation chains of a relation's columns
    Trace {
        #[command(flatten)]
        common: CommonArgs,

        /// Relation to trace (qualified or unqualified)
        #[arg(short, long)]
        relation: String,

        /// Single column to trace (all columns when omitted)
        #[arg(short, long)]
        column: Option<String>
    },

    /// List what a relation reads, or what reads it
    Deps {
        #[command(flatten)]
        common: CommonArgs,

        /// Relation to inspect
        #[arg(short, long)]
        relation: String,

        /// List dependent views instead of dependencies
        #[arg(long)]
        reverse: bool
    }
}

impl Commands {
    /// Options shared by every command.
    pub fn common(&self) -> &CommonArgs {
        match self {
            Self::Analyze {
                common
            }
            | Self::Trace {
                common, ..
            }
            | Self::Deps {
                common, ..
            } => common
        }
    }
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Schema file: `.sql` DDL, or a `.json` / `.yaml` / `.toml` catalog
    #[arg(short, long)]
    pub schema: PathBuf,

    /// SQL dialect for parsing
    #[arg(long, value_enum)]
    pub dialect: Option<Dialect>,

    /// Schema assumed for unqualified names
    #[arg(long)]
    pub default_schema: Option<String>,

    /// Output format
    #[arg(short = 'f', long, value_enum)]
    pub output_format: Option<Format>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Show every step of pass-through chains
    #[arg(long)]
    pub full: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Dialect {
    Generic,
    Mysql,
    Postgresql,
    Sqlite,
    Clickhouse
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Yaml
}
