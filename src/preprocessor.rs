//! View definition preprocessing.
//!
//! Catalogs store view definitions in two shapes: the bare query text (as
//! `pg_views.definition` returns it) and full DDL
//! (`CREATE [OR REPLACE] VIEW name [(cols)] AS ...`). This module reduces
//! both to the query body and remembers where the body starts so parser
//! positions can be reported against the original text.
//!
//! # Example
//!
//! ```
//! use sql_lineage_analyzer::preprocessor::preprocess;
//!
//! let def = preprocess("CREATE OR REPLACE VIEW sales.v (a, b) AS\n  SELECT x, y FROM t;");
//!
//! assert_eq!(def.name.as_deref(), Some("sales.v"));
//! assert_eq!(def.column_aliases.len(), 2);
//! assert_eq!(def.body, "SELECT x, y FROM t");
//! assert_eq!(def.offset.line, 1);
//! ```

use std::sync::LazyLock;

use compact_str::CompactString;
use regex::Regex;

use crate::{error::SourceSpan, schema::ColumnVec};

/// Matches a `CREATE VIEW` header up to and including `AS`.
///
/// Covers PostgreSQL (`OR REPLACE`, `TEMP`, `MATERIALIZED`, `RECURSIVE`,
/// `WITH (options)`), MySQL (`ALGORITHM`, `DEFINER`, `SQL SECURITY`) and
/// SQLite (`IF NOT EXISTS`) variants.
static VIEW_HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?(?:ALGORITHM\s*=\s*\w+\s+)?(?:DEFINER\s*=\s*\S+\s+)?(?:SQL\s+SECURITY\s+\w+\s+)?(?:(?:TEMP|TEMPORARY)\s+)?(?:MATERIALIZED\s+)?(?:RECURSIVE\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?(?P<name>(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[\w$]+)(?:\s*\.\s*(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[\w$]+))*)\s*(?:\((?P<cols>[^()]*)\)\s*)?(?:WITH\s*\([^()]*\)\s*)?AS\b"#
    )
    .expect("valid regex")
});

/// Matches the trailing `WITH [CASCADED | LOCAL] CHECK OPTION` clause.
static CHECK_OPTION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\s+WITH\s+(?:CASCADED\s+|LOCAL\s+)?CHECK\s+OPTION\s*$").expect("valid regex")
});

/// Position of the query body inside the original definition text.
///
/// Both fields are zero-based shifts: `line` is the number of line breaks
/// before the body, `column` the number of characters preceding it on its
/// first line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyOffset {
    pub line:   u64,
    pub column: u64
}

impl BodyOffset {
    /// Translate a position reported for the body into one for the original
    /// text.
    pub fn apply(&self, span: SourceSpan) -> SourceSpan {
        SourceSpan {
            line:   span.line + self.line,
            column: if span.line <= 1 {
                span.column + self.column
            } else {
                span.column
            }
        }
    }
}

/// A view definition reduced to its query body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    /// View name from the DDL header, quotes removed
    pub name:           Option<CompactString>,
    /// Column alias list from `CREATE VIEW v (a, b)`
    pub column_aliases: ColumnVec,
    /// Query text without header, trailing semicolon or check option
    pub body:           String,
    pub offset:         BodyOffset
}

/// Whether `sql` starts with a `CREATE VIEW` header.
pub fn is_view_ddl(sql: &str) -> bool {
    VIEW_HEADER_REGEX.is_match(sql)
}

/// Reduce a view definition to its query body.
///
/// Text without a `CREATE VIEW` header is taken as the body itself.
pub fn preprocess(sql: &str) -> ViewDefinition {
    let (name, column_aliases, body_start) = match VIEW_HEADER_REGEX.captures(sql) {
        Some(caps) => {
            let name = caps.name("name").map(|m| strip_quotes(m.as_str()));
            let aliases = caps
                .name("cols")
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(strip_quotes)
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            (name, aliases, end)
        }
        None => (None, ColumnVec::new(), 0)
    };

    let rest = &sql[body_start..];
    let leading = rest.len() - rest.trim_start().len();
    let start = body_start + leading;
    let body = trim_body(&sql[start..]);

    ViewDefinition {
        name,
        column_aliases,
        body,
        offset: offset_of(sql, start)
    }
}

fn trim_body(body: &str) -> String {
    let mut body = body.trim_end();
    while let Some(stripped) = body.strip_suffix(';') {
        body = stripped.trim_end();
    }
    match CHECK_OPTION_REGEX.find(body) {
        Some(m) => body[..m.start()].to_string(),
        None => body.to_string()
    }
}

fn offset_of(sql: &str, start: usize) -> BodyOffset {
    let before = &sql[..start];
    let line = before.matches('\n').count() as u64;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    BodyOffset {
        line,
        column: before[line_start..].chars().count() as u64
    }
}

/// Remove identifier quotes from each part of a possibly qualified name,
/// preserving case.
pub fn strip_quotes(name: &str) -> CompactString {
    let parts: Vec<&str> = name
        .split('.')
        .map(|p| p.trim().trim_matches(|c| matches!(c, '"' | '`' | '[' | ']')))
        .filter(|p| !p.is_empty())
        .collect();
    parts.join(".").into()
}
