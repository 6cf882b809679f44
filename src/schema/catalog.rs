//! Serialized metadata catalog loader.
//!
//! A catalog is the output of an introspection step: every table and view
//! with its columns, keys and (for views) definition text. JSON, YAML and
//! TOML encodings share one shape:
//!
//! ```json
//! {
//!   "default_schema": "public",
//!   "relations": [
//!     { "name": "public.orders", "kind": "table",
//!       "columns": [ { "name": "id", "data_type": "int" } ],
//!       "primary_key": ["id"] },
//!     { "name": "public.order_ids", "kind": "view",
//!       "definition": "SELECT id FROM orders" }
//!   ]
//! }
//! ```

use std::path::Path;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use super::{Relation, Schema};
use crate::error::{AppResult, schema_load_error};

/// Encoding of a catalog file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Json,
    Yaml,
    Toml
}

impl CatalogFormat {
    /// Detect the encoding from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None
        }
    }
}

/// On-disk catalog document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub default_schema: Option<CompactString>,
    #[serde(default)]
    pub relations:      Vec<Relation>
}

impl Catalog {
    /// Decode a catalog document.
    ///
    /// # Errors
    ///
    /// Returns error if the content is not a valid catalog in `format`
    pub fn parse(content: &str, format: CatalogFormat) -> AppResult<Self> {
        match format {
            CatalogFormat::Json => serde_json::from_str(content)
                .map_err(|e| schema_load_error(format!("Invalid JSON catalog: {}", e))),
            CatalogFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| schema_load_error(format!("Invalid YAML catalog: {}", e))),
            CatalogFormat::Toml => toml::from_str(content)
                .map_err(|e| schema_load_error(format!("Invalid TOML catalog: {}", e)))
        }
    }

    /// Build the schema. `default_schema` overrides the catalog's own value.
    ///
    /// # Errors
    ///
    /// Returns error on duplicate relation names
    pub fn into_schema(self, default_schema: Option<&str>) -> AppResult<Schema> {
        let default = default_schema
            .map(CompactString::from)
            .or(self.default_schema)
            .unwrap_or_else(|| super::DEFAULT_SCHEMA.into());
        Schema::from_relations(default, self.relations)
    }
}

impl Schema {
    /// Load a schema from serialized catalog content.
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails or relation names repeat
    pub fn from_catalog(
        content: &str,
        format: CatalogFormat,
        default_schema: Option<&str>
    ) -> AppResult<Self> {
        Catalog::parse(content, format)?.into_schema(default_schema)
    }
}
