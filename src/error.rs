//! Error types and constructors.
//!
//! Two families live here:
//!
//! - Application failures (reading files, loading a schema, configuration)
//!   are [`AppError`] values created through the constructor helpers below.
//! - Analysis failures are structured values that are returned alongside
//!   successful results instead of aborting a run: [`ParseError`],
//!   [`CycleError`] and [`UnresolvedReference`].

use std::sync::LazyLock;

use compact_str::CompactString;
pub use masterror::{AppError, AppResult};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

/// Matches the position suffix sqlparser appends to its messages, for
/// example `... at Line: 3, Column: 14`.
static POSITION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Line: (\d+), Column:? (\d+)").expect("valid regex"));

/// Create file read error
pub fn file_read_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!("Failed to read file '{}': {}", path, source))
}

/// Create schema load error with optional position info
pub fn schema_load_error(message: impl Into<String>) -> AppError {
    let msg = message.into();
    AppError::bad_request(format_sql_error("Schema load error", &msg))
}

/// Create config error
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// Format SQL error with position highlighting
fn format_sql_error(prefix: &str, message: &str) -> String {
    if let Some(pos) = extract_position(message) {
        format!(
            "{} at line {}, column {}:\n  {}",
            prefix, pos.line, pos.column, message
        )
    } else {
        format!("{}:\n  {}", prefix, message)
    }
}

/// Extract the line/column position from a sqlparser error message.
pub fn extract_position(message: &str) -> Option<SourceSpan> {
    let caps = POSITION_REGEX.captures(message)?;
    let line = caps.get(1)?.as_str().parse().ok()?;
    let column = caps.get(2)?.as_str().parse().ok()?;
    Some(SourceSpan {
        line,
        column
    })
}

/// One-based position of the start of an offending fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceSpan {
    pub line:   u64,
    pub column: u64
}

impl std::fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Why a view definition could not be structurally understood.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// The SQL text is not valid for the selected dialect
    #[error("syntax error: {0}")]
    Syntax(String),
    /// The relation is a view but carries no definition text
    #[error("view has no definition")]
    MissingDefinition,
    /// The definition is blank once the DDL header is removed
    #[error("definition is empty")]
    EmptyDefinition,
    /// A view is defined by exactly one query
    #[error("expected one statement, found {0}")]
    MultipleStatements(usize),
    /// The statement is not a query (`INSERT`, `DROP`, ...)
    #[error("statement is not a query")]
    NotAQuery,
    /// A construct the analyzer does not attempt to interpret
    #[error("unsupported construct: {0}")]
    Unsupported(CompactString),
    /// `*` or `alias.*` over a source whose columns are unknown
    #[error("cannot expand wildcard over '{0}'")]
    UnexpandableWildcard(CompactString),
    /// Set operation branches produce a different number of columns
    #[error("set operation branches have {left} and {right} columns")]
    SetOperationArity { left: usize, right: usize }
}

/// A view definition that could not be parsed.
///
/// Localized to one view: other views are analyzed normally.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("cannot parse definition of '{relation}': {kind}")]
pub struct ParseError {
    /// View whose definition failed
    pub relation: CompactString,
    /// Reason for the failure
    pub kind:     ParseErrorKind,
    /// Offending SQL fragment
    pub fragment: String,
    /// Start position of the fragment within the definition, when known
    pub span:     Option<SourceSpan>
}

impl ParseError {
    pub fn new(relation: impl Into<CompactString>, kind: ParseErrorKind) -> Self {
        Self {
            relation: relation.into(),
            kind,
            fragment: String::new(),
            span: None
        }
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = fragment.into();
        self
    }

    pub fn with_span(mut self, span: Option<SourceSpan>) -> Self {
        self.span = span;
        self
    }
}

/// A dependency cycle among views.
///
/// Members are listed in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error, Serialize)]
#[error("dependency cycle detected: {}", cycle_path(.members))]
pub struct CycleError {
    pub members: Vec<CompactString>
}

impl CycleError {
    /// Whether `relation` is one of the cycle members.
    pub fn contains(&self, relation: &str) -> bool {
        self.members
            .iter()
            .any(|m| m.eq_ignore_ascii_case(relation))
    }
}

fn cycle_path(members: &[CompactString]) -> String {
    let mut path: Vec<&str> = members.iter().map(|m| m.as_str()).collect();
    if let Some(first) = members.first() {
        path.push(first.as_str());
    }
    path.join(" -> ")
}

/// Why a column or relation reference could not be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Qualifier is not bound in the FROM clause
    UnknownAlias,
    /// Column does not exist in the referenced relation
    UnknownColumn,
    /// Unqualified column matches more than one source
    AmbiguousColumn,
    /// Relation does not exist in the schema
    UnknownRelation,
    /// Expression form whose derivation is not analyzed
    Unsupported,
    /// Upstream view has no lineage (parse failure or cycle)
    LineageUnavailable
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAlias => write!(f, "alias is not bound in FROM clause"),
            Self::UnknownColumn => write!(f, "column does not exist"),
            Self::AmbiguousColumn => write!(f, "column reference is ambiguous"),
            Self::UnknownRelation => write!(f, "relation does not exist"),
            Self::Unsupported => write!(f, "derivation is not supported"),
            Self::LineageUnavailable => write!(f, "lineage unavailable")
        }
    }
}

/// A reference that could not be matched against the schema.
///
/// Attached to the column or chain step where it occurred; never fatal for
/// sibling columns or other views.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error, Serialize)]
#[error("unresolved reference '{reference}' in '{relation}': {reason}")]
pub struct UnresolvedReference {
    /// Relation in which the reference appears
    pub relation:  CompactString,
    /// Output column the reference belongs to, if any
    pub column:    Option<CompactString>,
    /// Reference as written
    pub reference: String,
    pub reason:    UnresolvedReason
}

impl UnresolvedReference {
    pub fn new(
        relation: impl Into<CompactString>,
        reference: impl Into<String>,
        reason: UnresolvedReason
    ) -> Self {
        Self {
            relation: relation.into(),
            column: None,
            reference: reference.into(),
            reason
        }
    }

    pub fn for_column(mut self, column: Option<CompactString>) -> Self {
        self.column = column;
        self
    }
}
