//! SQL DDL loader.
//!
//! Builds a [`Schema`] from a script of `CREATE TABLE`, `CREATE VIEW` and
//! `COMMENT ON` statements.
//!
//! # Supported Statements
//!
//! - `CREATE TABLE` with column types, `NOT NULL`, inline and table-level
//!   `PRIMARY KEY` and `REFERENCES` / `FOREIGN KEY` constraints
//! - `CREATE [OR REPLACE] [MATERIALIZED] VIEW` with optional column list
//! - `COMMENT ON TABLE | VIEW ... IS '...'`
//!
//! View column lists come from the DDL header when present, otherwise they
//! are inferred from the view body against the relations loaded so far.
//!
//! # Example
//!
//! ```
//! use sql_lineage_analyzer::{query::SqlDialect, schema::Schema};
//!
//! let sql = r#"
//!     CREATE TABLE customers (id INT PRIMARY KEY, name TEXT NOT NULL);
//!     CREATE TABLE orders (
//!         id INT,
//!         customer_id INT REFERENCES customers(id),
//!         amount NUMERIC,
//!         PRIMARY KEY (id)
//!     );
//!     CREATE VIEW order_totals AS
//!         SELECT customer_id, sum(amount) AS total FROM orders GROUP BY customer_id;
//! "#;
//!
//! let schema = Schema::parse(sql, SqlDialect::Generic).unwrap();
//!
//! assert_eq!(schema.primary_key("orders").unwrap()[0], "id");
//! assert_eq!(schema.foreign_keys("orders")[0].to_relation, "customers");
//! let view = schema.get("order_totals").unwrap();
//! assert_eq!(view.column_names().as_slice(), ["customer_id", "total"]);
//! ```

use std::sync::LazyLock;

use compact_str::CompactString;
use log::{debug, warn};
use regex::Regex;
use sqlparser::{
    ast::{
        ColumnOption, CreateTable, Expr, ForeignKeyConstraint, IndexColumn, Statement,
        TableConstraint
    },
    parser::Parser,
    tokenizer::{Token, Tokenizer}
};

use super::{Column, ColumnVec, DEFAULT_SCHEMA, ForeignKey, Relation, Schema};
use crate::{
    error::{AppResult, schema_load_error},
    preprocessor::{is_view_ddl, preprocess, strip_quotes},
    query::{SqlDialect, parse_view}
};

/// `COMMENT ON TABLE name IS '...'`.
static COMMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^COMMENT\s+ON\s+(?:TABLE|VIEW|MATERIALIZED\s+VIEW)\s+(\S+)\s+IS\s+'(.*)'$")
        .expect("valid regex")
});

impl Schema {
    /// Parse a DDL script with the specified dialect
    ///
    /// # Arguments
    ///
    /// * `sql` - DDL script
    /// * `dialect` - SQL dialect for parsing
    ///
    /// # Errors
    ///
    /// Returns error if SQL parsing fails or relation names repeat
    pub fn parse(sql: &str, dialect: SqlDialect) -> AppResult<Self> {
        Self::parse_with_default(sql, dialect, DEFAULT_SCHEMA)
    }

    /// Parse a DDL script resolving unqualified names in `default_schema`.
    ///
    /// # Errors
    ///
    /// Returns error if SQL parsing fails or relation names repeat
    pub fn parse_with_default(
        sql: &str,
        dialect: SqlDialect,
        default_schema: &str
    ) -> AppResult<Self> {
        let parser_dialect = dialect.into_parser_dialect();
        let mut schema = Self::new(default_schema);
        let mut comments = Vec::new();
        for chunk in split_statements(sql, dialect)? {
            let statements = match Parser::parse_sql(parser_dialect.as_ref(), &chunk) {
                Ok(statements) => statements,
                Err(e) if is_view_ddl(&chunk) => {
                    warn!("Keeping unparseable view definition: {}", e);
                    schema.insert(view_from_ddl(chunk)?)?;
                    continue;
                }
                Err(e) => return Err(schema_load_error(e.to_string()))
            };
            for stmt in statements {
                match stmt {
                    Statement::CreateTable(create) => schema.insert(table_from_ddl(&create))?,
                    other => {
                        let text = other.to_string();
                        if is_view_ddl(&text) {
                            schema.insert(view_from_ddl(text)?)?;
                        } else if let Some(caps) = COMMENT_REGEX.captures(&text) {
                            comments.push((
                                strip_quotes(&caps[1]),
                                caps[2].replace("''", "'")
                            ));
                        } else {
                            debug!("Skipping statement: {}", text);
                        }
                    }
                }
            }
        }
        for (name, comment) in comments {
            if let Some(idx) = schema.position(&name) {
                schema.relations[idx].comment = Some(comment);
            }
        }
        schema.resolve_implicit_references();
        schema.infer_view_columns(dialect);
        Ok(schema)
    }

    /// Point `REFERENCES t` without a column list at the target's primary key.
    fn resolve_implicit_references(&mut self) {
        let mut fixes = Vec::new();
        for (r_idx, relation) in self.relations.values().enumerate() {
            for (c_idx, column) in relation.columns.iter().enumerate() {
                if let Some(fk) = &column.foreign_key
                    && fk.column.is_empty()
                    && let Some(pk) = self.primary_key(&fk.relation)
                    && let Some(first) = pk.first()
                {
                    fixes.push((r_idx, c_idx, first.clone()));
                }
            }
        }
        for (r_idx, c_idx, target) in fixes {
            if let Some(fk) = self.relations[r_idx].columns[c_idx].foreign_key.as_mut() {
                fk.column = target;
            }
        }
    }

    /// Fill in column lists of views declared without one.
    ///
    /// Views may read views declared later in the script, so passes repeat
    /// until no further view can be resolved.
    fn infer_view_columns(&mut self, dialect: SqlDialect) {
        let mut pending: Vec<usize> = self
            .relations
            .values()
            .enumerate()
            .filter(|(_, r)| r.is_view() && r.columns.is_empty())
            .map(|(idx, _)| idx)
            .collect();
        while !pending.is_empty() {
            let mut unresolved = Vec::new();
            let mut progressed = false;
            for idx in pending {
                let names = parse_view(self, &self.relations[idx], dialect)
                    .ok()
                    .map(|parsed| parsed.output_names())
                    .filter(|names| !names.is_empty());
                match names {
                    Some(names) => {
                        self.set_columns(idx, names);
                        progressed = true;
                    }
                    None => unresolved.push(idx)
                }
            }
            if !progressed {
                for idx in &unresolved {
                    debug!(
                        "Cannot infer columns of view '{}'",
                        self.relations[*idx].name
                    );
                }
                break;
            }
            pending = unresolved;
        }
    }

    fn set_columns(&mut self, idx: usize, names: ColumnVec) {
        let relation = &mut self.relations[idx];
        relation.columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let mut column = Column::new(name, "");
                column.ordinal = i + 1;
                column
            })
            .collect();
    }
}

/// Split a script into statement texts on top-level semicolons.
///
/// Splitting on tokens keeps semicolons inside literals and comments intact.
fn split_statements(sql: &str, dialect: SqlDialect) -> AppResult<Vec<String>> {
    let parser_dialect = dialect.into_parser_dialect();
    let tokens = Tokenizer::new(parser_dialect.as_ref(), sql)
        .with_unescape(false)
        .tokenize()
        .map_err(|e| schema_load_error(e.to_string()))?;
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut has_content = false;
    for token in tokens {
        match token {
            Token::SemiColon => {
                if has_content {
                    chunks.push(current.trim().to_string());
                }
                current.clear();
                has_content = false;
            }
            Token::Whitespace(ws) => current.push_str(&ws.to_string()),
            other => {
                current.push_str(&other.to_string());
                has_content = true;
            }
        }
    }
    if has_content {
        chunks.push(current.trim().to_string());
    }
    Ok(chunks)
}

fn table_from_ddl(create: &CreateTable) -> Relation {
    let mut primary_key = ColumnVec::new();
    let mut columns = Vec::with_capacity(create.columns.len());
    for column in &create.columns {
        let mut col = Column::new(column.name.value.as_str(), column.data_type.to_string());
        for opt in &column.options {
            match &opt.option {
                ColumnOption::NotNull => col = col.not_null(),
                ColumnOption::PrimaryKey(_) => {
                    primary_key.push(col.name.clone());
                    col = col.not_null();
                }
                ColumnOption::ForeignKey(fk) => {
                    let target = fk
                        .referred_columns
                        .first()
                        .map(|c| CompactString::from(c.value.as_str()))
                        .unwrap_or_default();
                    col = col.references(foreign_table(fk), target);
                }
                _ => {}
            }
        }
        columns.push(col);
    }

    for constraint in &create.constraints {
        match constraint {
            TableConstraint::ForeignKey(fk) => {
                let target = foreign_table(fk);
                for (i, local) in fk.columns.iter().enumerate() {
                    if let Some(col) = columns
                        .iter_mut()
                        .find(|c| c.name.eq_ignore_ascii_case(&local.value))
                    {
                        col.foreign_key = Some(ForeignKey {
                            relation: target.clone(),
                            column:   fk
                                .referred_columns
                                .get(i)
                                .map(|c| c.value.as_str().into())
                                .unwrap_or_default()
                        });
                    }
                }
            }
            TableConstraint::PrimaryKey(pk) => {
                for name in pk.columns.iter().map(index_column_name) {
                    if let Some(col) = columns
                        .iter_mut()
                        .find(|c| c.name.eq_ignore_ascii_case(&name))
                    {
                        col.is_nullable = false;
                    }
                    primary_key.push(name);
                }
            }
            _ => {}
        }
    }

    let mut relation = Relation::table(strip_quotes(&create.name.to_string()), columns);
    if !primary_key.is_empty() {
        relation.primary_key = Some(primary_key);
    }
    relation
}

fn foreign_table(fk: &ForeignKeyConstraint) -> CompactString {
    strip_quotes(&fk.foreign_table.to_string())
}

fn index_column_name(column: &IndexColumn) -> CompactString {
    match &column.column.expr {
        Expr::Identifier(ident) => ident.value.as_str().into(),
        other => strip_quotes(&other.to_string())
    }
}

fn view_from_ddl(text: String) -> AppResult<Relation> {
    let definition = preprocess(&text);
    let Some(name) = definition.name else {
        return Err(schema_load_error(format!("View without name: {}", text)));
    };
    let columns = definition
        .column_aliases
        .iter()
        .map(|alias| Column::new(alias.clone(), ""))
        .collect();
    Ok(Relation::view(name, columns, text))
}
