//! Configuration loading and management.
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//!
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. `.sql-lineage.toml` in current directory
//! 4. `~/.config/sql-lineage/config.toml`
//! 5. Default values
//!
//! # Configuration File Format
//!
//! ```toml
//! [analysis]
//! dialect = "postgresql"       # generic, mysql, postgresql, sqlite, clickhouse
//! default_schema = "public"
//! parallel = true
//!
//! [output]
//! format = "text"              # text, json, yaml
//! color = true
//! condense = true              # collapse pass-through chains
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `SQL_LINEAGE_DIALECT` | SQL dialect |
//! | `SQL_LINEAGE_DEFAULT_SCHEMA` | Schema for unqualified names |
//! | `SQL_LINEAGE_FORMAT` | Output format |

use std::{
    env, fs,
    path::{Path, PathBuf}
};

use serde::Deserialize;

use crate::{
    error::{AppResult, config_error},
    output::OutputFormat,
    query::SqlDialect,
    schema::DEFAULT_SCHEMA
};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub output:   OutputConfig
}

/// Analysis configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub dialect:        SqlDialect,
    pub default_schema: String,
    pub parallel:       bool
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dialect:        SqlDialect::Generic,
            default_schema: String::from(DEFAULT_SCHEMA),
            parallel:       true
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub format:   OutputFormat,
    pub color:    bool,
    pub condense: bool
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format:   OutputFormat::Text,
            color:    true,
            condense: true
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file in current directory (.sql-lineage.toml)
    /// 3. Config file in home directory (~/.config/sql-lineage/config.toml)
    /// 4. Default values
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        // Try to load from home directory config
        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("sql-lineage")
                .join("config.toml");

            if home_config.exists() {
                config = Self::from_file(&home_config)?;
            }
        }

        // Try to load from current directory config (overrides home config)
        let local_config = PathBuf::from(".sql-lineage.toml");
        if local_config.exists() {
            config = Self::from_file(&local_config)?;
        }

        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Read one TOML config file.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| config_error(format!("Invalid config file: {}", e)))
    }

    /// Override settings from environment variables read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> AppResult<()> {
        if let Some(dialect) = var("SQL_LINEAGE_DIALECT") {
            self.analysis.dialect = parse_value("SQL_LINEAGE_DIALECT", &dialect)?;
        }

        if let Some(schema) = var("SQL_LINEAGE_DEFAULT_SCHEMA") {
            self.analysis.default_schema = schema;
        }

        if let Some(format) = var("SQL_LINEAGE_FORMAT") {
            self.output.format = parse_value("SQL_LINEAGE_FORMAT", &format)?;
        }

        Ok(())
    }
}

/// Parse a bare enum value the way it is written in the config file.
fn parse_value<T: serde::de::DeserializeOwned>(name: &str, value: &str) -> AppResult<T> {
    let lowered = value.trim().to_lowercase();
    serde_json::from_value(serde_json::Value::String(lowered))
        .map_err(|_| config_error(format!("Invalid value '{}' for {}", value, name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::from_toml("[analysis]\ndialect = \"mysql\"\n").unwrap();
        config
            .apply_env(|key| match key {
                "SQL_LINEAGE_DIALECT" => Some("PostgreSQL".to_string()),
                "SQL_LINEAGE_FORMAT" => Some("json".to_string()),
                _ => None
            })
            .unwrap();
        assert_eq!(config.analysis.dialect, SqlDialect::PostgreSQL);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.analysis.default_schema, "public");
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_env(|key| {
            (key == "SQL_LINEAGE_FORMAT").then(|| "html".to_string())
        });
        assert!(result.is_err());
    }
}
