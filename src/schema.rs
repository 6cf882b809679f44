//! Schema Model: tables, views, columns and keys.
//!
//! The [`Schema`] is a read-only index over [`Relation`]s once constructed.
//! It is populated by a metadata loader ([`catalog`] for serialized
//! introspection output, [`ddl`] for `CREATE TABLE` / `CREATE VIEW`
//! scripts) or by an embedding application through
//! [`Schema::from_relations`].
//!
//! # Name resolution
//!
//! Identifiers compare case-insensitively and quote characters are ignored.
//! An unqualified name is looked up as written, then inside the default
//! schema, then as a unique bare-name match across all schemas.
//!
//! # Example
//!
//! ```
//! use sql_lineage_analyzer::schema::{Column, Relation, Schema};
//!
//! let schema = Schema::from_relations(
//!     "public",
//!     vec![
//!         Relation::table(
//!             "public.customers",
//!             vec![Column::new("id", "int"), Column::new("name", "text")]
//!         )
//!         .with_primary_key(["id"]),
//!         Relation::view(
//!             "public.customer_names",
//!             vec![Column::new("name", "text")],
//!             "SELECT name FROM customers"
//!         ),
//!     ]
//! )
//! .unwrap();
//!
//! let customers = schema.get("customers").unwrap();
//! assert_eq!(customers.columns[1].ordinal, 2);
//! assert_eq!(schema.primary_key("CUSTOMERS").unwrap()[0], "id");
//! assert_eq!(schema.views().count(), 1);
//! ```

pub mod catalog;
pub mod ddl;

use std::{fs::read_to_string, path::Path};

use catalog::CatalogFormat;
use compact_str::{CompactString, ToCompactString};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    error::{
        AppResult, UnresolvedReason, UnresolvedReference, file_read_error, schema_load_error
    },
    query::SqlDialect
};

/// Schema used for unqualified names unless configured otherwise.
pub const DEFAULT_SCHEMA: &str = "public";

/// Type alias for small column name vectors (typically < 8 elements)
pub type ColumnVec = SmallVec<[CompactString; 8]>;

/// Kind of relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Table,
    View
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "TABLE"),
            Self::View => write!(f, "VIEW")
        }
    }
}

/// Target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referenced relation
    pub relation: CompactString,
    /// Referenced column
    pub column:   CompactString
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name:        CompactString,
    /// Declared SQL type (e.g., "integer", "varchar(255)")
    #[serde(default)]
    pub data_type:   String,
    /// One-based position in the owning relation, assigned on construction
    #[serde(default)]
    pub ordinal:     usize,
    /// Whether NULL values are allowed
    #[serde(default = "default_nullable")]
    pub is_nullable: bool,
    /// Referenced relation and column, if this is a foreign key
    #[serde(default, alias = "references")]
    pub foreign_key: Option<ForeignKey>
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<CompactString>, data_type: impl Into<String>) -> Self {
        Self {
            name:        name.into(),
            data_type:   data_type.into(),
            ordinal:     0,
            is_nullable: true,
            foreign_key: None
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    #[must_use]
    pub fn references(
        mut self,
        relation: impl Into<CompactString>,
        column: impl Into<CompactString>
    ) -> Self {
        self.foreign_key = Some(ForeignKey {
            relation: relation.into(),
            column:   column.into()
        });
        self
    }
}

/// A table or view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Qualified name (`schema.name`) or bare name
    pub name:        CompactString,
    pub kind:        RelationKind,
    /// Columns in declaration order
    #[serde(default)]
    pub columns:     Vec<Column>,
    /// Primary key columns (tables only)
    #[serde(default)]
    pub primary_key: Option<ColumnVec>,
    /// Raw SQL definition (views only)
    #[serde(default)]
    pub definition:  Option<String>,
    #[serde(default)]
    pub comment:     Option<String>
}

impl Relation {
    pub fn table(name: impl Into<CompactString>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::Table,
            columns,
            primary_key: None,
            definition: None,
            comment: None
        }
    }

    pub fn view(
        name: impl Into<CompactString>,
        columns: Vec<Column>,
        definition: impl Into<String>
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::View,
            columns,
            primary_key: None,
            definition: Some(definition.into()),
            comment: None
        }
    }

    #[must_use]
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>
    {
        self.primary_key = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn is_view(&self) -> bool {
        self.kind == RelationKind::View
    }

    /// Look up a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&Column> {
        let name = normalize_identifier(name);
        self.columns
            .iter()
            .find(|c| normalize_identifier(&c.name) == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> ColumnVec {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Name without the schema qualifier.
    pub fn bare_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// A foreign key relationship between two relations (an ER diagram edge).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ForeignKeyEdge {
    pub from_relation: CompactString,
    pub from_column:   CompactString,
    pub to_relation:   CompactString,
    pub to_column:     CompactString
}

/// Read-only index over all relations of a database schema.
///
/// Relations keep their insertion order, which is also the order used for
/// every deterministic traversal in the analyzer.
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    default_schema: CompactString,
    relations:      IndexMap<CompactString, Relation>
}

impl Default for Schema {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA)
    }
}

impl Schema {
    /// Create an empty schema with the given default schema name.
    pub fn new(default_schema: impl Into<CompactString>) -> Self {
        Self {
            default_schema: normalize_identifier(&default_schema.into()),
            relations:      IndexMap::new()
        }
    }

    /// Build a schema from relations supplied by a metadata collaborator.
    ///
    /// # Errors
    ///
    /// Returns error if two relations share the same name
    pub fn from_relations(
        default_schema: impl Into<CompactString>,
        relations: impl IntoIterator<Item = Relation>
    ) -> AppResult<Self> {
        let mut schema = Self::new(default_schema);
        for relation in relations {
            schema.insert(relation)?;
        }
        Ok(schema)
    }

    /// Load a schema file: `.sql` as DDL, `.json` / `.yaml` / `.yml` /
    /// `.toml` as a serialized catalog.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn load(
        path: &Path,
        dialect: SqlDialect,
        default_schema: Option<&str>
    ) -> AppResult<Self> {
        let content = read_to_string(path)
            .map_err(|e| file_read_error(&path.display().to_string(), e))?;
        match CatalogFormat::from_path(path) {
            Some(format) => Self::from_catalog(&content, format, default_schema),
            None => Self::parse_with_default(
                &content,
                dialect,
                default_schema.unwrap_or(DEFAULT_SCHEMA)
            )
        }
    }

    pub(crate) fn insert(&mut self, mut relation: Relation) -> AppResult<()> {
        let key = normalize_name(&relation.name);
        if key.is_empty() {
            return Err(schema_load_error("Relation with empty name"));
        }
        if self.relations.contains_key(&key) {
            return Err(schema_load_error(format!(
                "Duplicate relation '{}'",
                relation.name
            )));
        }
        for (idx, column) in relation.columns.iter_mut().enumerate() {
            column.ordinal = idx + 1;
        }
        self.relations.insert(key, relation);
        Ok(())
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// All relations in insertion order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Relation> {
        self.relations().filter(|r| r.kind == RelationKind::Table)
    }

    pub fn views(&self) -> impl Iterator<Item = &Relation> {
        self.relations().filter(|r| r.kind == RelationKind::View)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Look up a relation by qualified or unqualified name.
    pub fn get(&self, name: &str) -> Option<&Relation> {
        self.position(name).map(|idx| &self.relations[idx])
    }

    /// Insertion index of a relation.
    pub fn position(&self, name: &str) -> Option<usize> {
        lookup_key(&self.relations, &self.default_schema, name)
    }

    /// Columns of a relation in declaration order.
    pub fn columns(&self, name: &str) -> Option<&[Column]> {
        self.get(name).map(|r| r.columns.as_slice())
    }

    /// Primary key columns of a table.
    pub fn primary_key(&self, name: &str) -> Option<&[CompactString]> {
        self.get(name)?.primary_key.as_deref()
    }

    /// Outgoing foreign keys of a relation.
    pub fn foreign_keys(&self, name: &str) -> Vec<ForeignKeyEdge> {
        let Some(relation) = self.get(name) else {
            return vec![];
        };
        relation
            .columns
            .iter()
            .filter_map(|c| {
                c.foreign_key.as_ref().map(|fk| ForeignKeyEdge {
                    from_relation: relation.name.clone(),
                    from_column:   c.name.clone(),
                    to_relation:   self
                        .get(&fk.relation)
                        .map(|r| r.name.clone())
                        .unwrap_or_else(|| fk.relation.clone()),
                    to_column:     fk.column.clone()
                })
            })
            .collect()
    }

    /// Foreign keys of other relations that reference `name`.
    pub fn referencing(&self, name: &str) -> Vec<ForeignKeyEdge> {
        let Some(target) = self.get(name) else {
            return vec![];
        };
        self.foreign_key_edges()
            .into_iter()
            .filter(|edge| edge.to_relation == target.name)
            .collect()
    }

    /// Every foreign key in the schema, in relation then column order.
    pub fn foreign_key_edges(&self) -> Vec<ForeignKeyEdge> {
        self.relations()
            .flat_map(|r| self.foreign_keys(&r.name))
            .collect()
    }

    /// Foreign keys pointing at relations or columns that do not exist.
    pub fn dangling_foreign_keys(&self) -> Vec<UnresolvedReference> {
        self.foreign_key_edges()
            .into_iter()
            .filter_map(|edge| {
                let reference = format!("{}.{}", edge.to_relation, edge.to_column);
                let reason = match self.get(&edge.to_relation) {
                    None => UnresolvedReason::UnknownRelation,
                    Some(target) if !target.has_column(&edge.to_column) => {
                        UnresolvedReason::UnknownColumn
                    }
                    Some(_) => return None
                };
                Some(
                    UnresolvedReference::new(edge.from_relation, reference, reason)
                        .for_column(Some(edge.from_column))
                )
            })
            .collect()
    }

    /// Get summary of schema as plain text
    pub fn to_summary(&self) -> String {
        let mut summary = String::from("Database Schema:\n\n");
        for relation in self.relations() {
            summary.push_str(&format!("{}: {}\n", relation.kind, relation.name));
            if let Some(comment) = &relation.comment {
                summary.push_str(&format!("Comment: {}\n", comment));
            }
            if let Some(primary_key) = &relation.primary_key {
                summary.push_str(&format!("Primary Key: ({})\n", primary_key.join(", ")));
            }
            summary.push_str("Columns:\n");
            for col in &relation.columns {
                let nullable = if col.is_nullable { "NULL" } else { "NOT NULL" };
                let references = col
                    .foreign_key
                    .as_ref()
                    .map(|fk| format!(" REFERENCES {}({})", fk.relation, fk.column))
                    .unwrap_or_default();
                summary.push_str(&format!(
                    "  - {name} {data_type} {nullable}{references}\n",
                    name = col.name,
                    data_type = col.data_type,
                    nullable = nullable,
                    references = references
                ));
            }
            summary.push('\n');
        }
        summary
    }
}

/// Index of `name` among normalized relation keys.
///
/// Tries the exact key, then the default-schema rule (`public.v` matches a
/// bare `v` and the reverse), then a bare name that is unique across
/// schemas.
pub(crate) fn lookup_key<V>(
    keys: &IndexMap<CompactString, V>,
    default_schema: &str,
    name: &str
) -> Option<usize> {
    let key = normalize_name(name);
    if let Some(idx) = keys.get_index_of(&key) {
        return Some(idx);
    }
    match key.split_once('.') {
        Some((schema, bare)) if schema == default_schema => keys.get_index_of(bare),
        Some(_) => None,
        None => {
            let qualified = format!("{}.{}", default_schema, key);
            if let Some(idx) = keys.get_index_of(qualified.as_str()) {
                return Some(idx);
            }
            let mut matches = keys
                .keys()
                .enumerate()
                .filter(|(_, k)| k.rsplit('.').next() == Some(key.as_str()));
            match (matches.next(), matches.next()) {
                (Some((idx, _)), None) => Some(idx),
                _ => None
            }
        }
    }
}

/// Normalize one identifier: strip quotes and fold case.
pub fn normalize_identifier(ident: &str) -> CompactString {
    ident
        .trim()
        .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_lowercase()
        .to_compact_string()
}

/// Normalize a possibly qualified name part by part.
pub fn normalize_name(name: &str) -> CompactString {
    let parts: Vec<CompactString> = name
        .split('.')
        .map(normalize_identifier)
        .filter(|p| !p.is_empty())
        .collect();
    parts.join(".").to_compact_string()
}
