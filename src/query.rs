//! SQL Statement Parser: view definitions into [`ParsedQuery`] models.
//!
//! Each definition is parsed with `sqlparser` and reduced to its output
//! expressions, FROM items, join conditions and the relations read by
//! expression subqueries. Column references are bound to FROM items while
//! parsing, so every leaf of an output [`Expression`] either points at a
//! known source or is an unresolved marker attributed to that column.
//!
//! # Example
//!
//! ```
//! use sql_lineage_analyzer::{
//!     query::{Expression, SqlDialect, parse_definition},
//!     schema::{Column, Relation, Schema}
//! };
//!
//! let schema = Schema::from_relations(
//!     "public",
//!     vec![Relation::table(
//!         "orders",
//!         vec![Column::new("qty", "int"), Column::new("price", "numeric")]
//!     )]
//! )
//! .unwrap();
//!
//! let parsed = parse_definition(
//!     &schema,
//!     "order_amounts",
//!     "SELECT o.qty * o.price AS amount FROM orders o",
//!     SqlDialect::Generic
//! )
//! .unwrap();
//!
//! let amount = parsed.output("amount").unwrap();
//! assert_eq!(amount.expression.leaves().len(), 2);
//! assert!(matches!(amount.expression, Expression::Binary { .. }));
//! assert_eq!(parsed.relation_references(), ["orders"]);
//! ```

mod extract;
mod types;

use extract::{ExtractionContext, extract_query};
use log::debug;
use serde::{Deserialize, Serialize};
use sqlparser::{
    ast::Statement,
    dialect::{
        ClickHouseDialect, Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect
    },
    parser::Parser
};
pub use types::{
    CaseBranch, ColumnRef, Expression, JoinCondition, JoinKind, Leaf, OutputColumn,
    ParsedQuery, SelectBody, Source, SourceTarget
};

use crate::{
    error::{ParseError, ParseErrorKind, extract_position},
    preprocessor::{ViewDefinition, preprocess},
    schema::{Relation, Schema}
};

/// SQL dialect for parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum SqlDialect {
    #[default]
    Generic,
    #[serde(alias = "mysql")]
    MySQL,
    #[serde(alias = "postgres")]
    PostgreSQL,
    SQLite,
    ClickHouse
}

impl SqlDialect {
    /// Convert to sqlparser dialect for parsing
    pub fn into_parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            Self::Generic => Box::new(GenericDialect {}),
            Self::MySQL => Box::new(MySqlDialect {}),
            Self::PostgreSQL => Box::new(PostgreSqlDialect {}),
            Self::SQLite => Box::new(SQLiteDialect {}),
            Self::ClickHouse => Box::new(ClickHouseDialect {})
        }
    }
}

/// Parse the stored definition of a view.
///
/// A `CREATE VIEW v (a, b)` column list renames outputs positionally; so
/// does the relation's metadata column list when its length matches.
///
/// # Errors
///
/// Returns [`ParseError`] when the definition is missing, is not a single
/// query, or uses a construct that is not analyzed
pub fn parse_view(
    schema: &Schema,
    relation: &Relation,
    dialect: SqlDialect
) -> Result<ParsedQuery, ParseError> {
    let Some(definition) = relation.definition.as_deref() else {
        return Err(ParseError::new(
            relation.name.clone(),
            ParseErrorKind::MissingDefinition
        ));
    };
    let view = preprocess(definition);
    let mut parsed = parse_body(schema, &relation.name, &view, dialect)?;
    if !view.column_aliases.is_empty() {
        apply_column_aliases(&mut parsed, &view)?;
    } else if !relation.columns.is_empty() && relation.columns.len() == parsed.outputs().len() {
        let names = relation.column_names();
        parsed.rename_outputs(names.as_slice());
    }
    debug!(
        "Parsed view '{}': {} columns, {} relations",
        relation.name,
        parsed.outputs().len(),
        parsed.relation_references().len()
    );
    Ok(parsed)
}

/// Parse a definition given as text (bare query or `CREATE VIEW` DDL).
///
/// # Errors
///
/// Returns [`ParseError`] under the same conditions as [`parse_view`]
pub fn parse_definition(
    schema: &Schema,
    relation: &str,
    sql: &str,
    dialect: SqlDialect
) -> Result<ParsedQuery, ParseError> {
    let view = preprocess(sql);
    let mut parsed = parse_body(schema, relation, &view, dialect)?;
    if !view.column_aliases.is_empty() {
        apply_column_aliases(&mut parsed, &view)?;
    }
    Ok(parsed)
}

fn apply_column_aliases(parsed: &mut ParsedQuery, view: &ViewDefinition) -> Result<(), ParseError> {
    if view.column_aliases.len() > parsed.outputs().len() {
        return Err(ParseError::new(
            parsed.relation.clone(),
            ParseErrorKind::Syntax(format!(
                "view declares {} column names for {} columns",
                view.column_aliases.len(),
                parsed.outputs().len()
            ))
        ));
    }
    parsed.rename_outputs(view.column_aliases.as_slice());
    Ok(())
}

fn parse_body(
    schema: &Schema,
    relation: &str,
    view: &ViewDefinition,
    dialect: SqlDialect
) -> Result<ParsedQuery, ParseError> {
    if view.body.trim().is_empty() {
        return Err(ParseError::new(relation, ParseErrorKind::EmptyDefinition));
    }
    let parser_dialect = dialect.into_parser_dialect();
    let statements = Parser::parse_sql(parser_dialect.as_ref(), &view.body)
        .map_err(|e| syntax_error(relation, view, e.to_string()))?;
    if statements.len() > 1 {
        return Err(ParseError::new(
            relation,
            ParseErrorKind::MultipleStatements(statements.len())
        )
        .with_fragment(view.body.clone()));
    }
    let Some(statement) = statements.into_iter().next() else {
        return Err(ParseError::new(relation, ParseErrorKind::EmptyDefinition));
    };
    let query = match statement {
        Statement::Query(query) => query,
        other => {
            return Err(ParseError::new(relation, ParseErrorKind::NotAQuery)
                .with_fragment(other.to_string()));
        }
    };

    let mut ctx = ExtractionContext::new(schema, relation, view.offset);
    let body = extract_query(&query, &mut ctx)?;
    Ok(ParsedQuery {
        relation: relation.into(),
        sql: view.body.clone(),
        body,
        expression_relations: ctx.expression_relations.into_iter().collect()
    })
}

fn syntax_error(relation: &str, view: &ViewDefinition, message: String) -> ParseError {
    let position = extract_position(&message);
    let fragment = position
        .and_then(|p| view.body.lines().nth(p.line.saturating_sub(1) as usize))
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| view.body.clone());
    ParseError::new(relation, ParseErrorKind::Syntax(message))
        .with_fragment(fragment)
        .with_span(position.map(|p| view.offset.apply(p)))
}
