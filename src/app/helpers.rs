//! Helper functions for CLI operations.
//!
//! Settings resolution, schema loading and the progress spinner.

use std::{
    io::{IsTerminal, stderr},
    time::Duration
};

use indicatif::{ProgressBar, ProgressStyle};

use super::{
    convert::{convert_dialect, convert_format},
    types::Settings
};
use crate::{
    cli::CommonArgs,
    config::Config,
    error::AppResult,
    output::{OutputFormat, OutputOptions},
    schema::Schema
};

/// Merge command-line flags over the loaded configuration.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
///
/// use sql_lineage_analyzer::{
///     app::resolve_settings,
///     cli::{CommonArgs, Dialect},
///     config::Config,
///     query::SqlDialect
/// };
///
/// let args = CommonArgs {
///     schema:         PathBuf::from("schema.sql"),
///     dialect:        Some(Dialect::Mysql),
///     default_schema: None,
///     output_format:  None,
///     no_color:       true,
///     full:           false,
///     verbose:        false
/// };
/// let settings = resolve_settings(&args, &Config::default());
/// assert_eq!(settings.dialect, SqlDialect::MySQL);
/// assert_eq!(settings.default_schema, "public");
/// assert!(!settings.output.colored);
/// ```
pub fn resolve_settings(args: &CommonArgs, config: &Config) -> Settings {
    Settings {
        dialect:        args
            .dialect
            .map(convert_dialect)
            .unwrap_or(config.analysis.dialect),
        default_schema: args
            .default_schema
            .clone()
            .unwrap_or_else(|| config.analysis.default_schema.clone()),
        parallel:       config.analysis.parallel,
        output:         OutputOptions {
            format:   args
                .output_format
                .map(convert_format)
                .unwrap_or(config.output.format),
            colored:  config.output.color && !args.no_color,
            condense: config.output.condense && !args.full
        }
    }
}

/// Load the schema file named on the command line.
pub fn load_schema(args: &CommonArgs, settings: &Settings) -> AppResult<Schema> {
    Schema::load(
        &args.schema,
        settings.dialect,
        Some(settings.default_schema.as_str())
    )
}

/// Spinner on stderr while analysing, for interactive text output only.
pub fn start_spinner(settings: &Settings, message: &'static str) -> Option<ProgressBar> {
    if settings.output.format != OutputFormat::Text || !stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}
