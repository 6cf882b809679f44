//! Application types for CLI commands.

use crate::{output::OutputOptions, query::SqlDialect};

/// Settings for one command after merging CLI flags, environment and
/// config files.
///
/// # Example
///
/// ```
/// use sql_lineage_analyzer::{app::Settings, output::OutputOptions, query::SqlDialect};
///
/// let settings = Settings {
///     dialect:        SqlDialect::PostgreSQL,
///     default_schema: "public".to_string(),
///     parallel:       true,
///     output:         OutputOptions::default()
/// };
/// assert!(settings.output.condense);
/// ```
#[derive(Debug, Clone)]
pub struct Settings {
    pub dialect:        SqlDialect,
    /// Schema assumed for unqualified relation names
    pub default_schema: String,
    pub parallel:       bool,
    pub output:         OutputOptions
}

/// Output from CLI command execution.
///
/// # Example
///
/// ```
/// use sql_lineage_analyzer::app::CommandOutput;
///
/// let output = CommandOutput {
///     exit_code: 0,
///     stdout:    "Analysis complete.".to_string()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code for the process (0=success, 1=warnings, 2=errors).
    pub exit_code: i32,
    /// Text to print to stdout.
    pub stdout:    String
}
