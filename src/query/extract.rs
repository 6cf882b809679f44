mod expr;
mod set_expr;
mod table;

use std::ops::Range;

use compact_str::CompactString;
use indexmap::IndexSet;
pub use set_expr::extract_query;
use sqlparser::ast::Spanned;

use super::types::{ColumnRef, Expression, Source, SourceTarget};
use crate::{
    error::{ParseError, ParseErrorKind, SourceSpan, UnresolvedReason, UnresolvedReference},
    preprocessor::BodyOffset,
    schema::Schema
};

/// State shared while extracting one view definition.
pub struct ExtractionContext<'a> {
    pub schema:               &'a Schema,
    pub relation:             CompactString,
    /// Where the parsed body starts in the stored definition
    pub offset:               BodyOffset,
    /// Output column currently being extracted, for marker attribution
    pub column:               Option<CompactString>,
    pub expression_relations: IndexSet<CompactString>
}

impl<'a> ExtractionContext<'a> {
    pub fn new(schema: &'a Schema, relation: &str, offset: BodyOffset) -> Self {
        Self {
            schema,
            relation: relation.into(),
            offset,
            column: None,
            expression_relations: IndexSet::new()
        }
    }

    /// Position of an AST node in the stored definition.
    pub fn span_of<T: Spanned>(&self, node: &T) -> Option<SourceSpan> {
        let start = node.span().start;
        if start.line == 0 {
            return None;
        }
        Some(self.offset.apply(SourceSpan {
            line:   start.line,
            column: start.column
        }))
    }

    /// Whole-view failure for a construct the analyzer does not interpret.
    pub fn unsupported<T: Spanned + std::fmt::Display>(
        &self,
        construct: &str,
        node: &T
    ) -> ParseError {
        ParseError::new(
            self.relation.clone(),
            ParseErrorKind::Unsupported(construct.into())
        )
        .with_fragment(node.to_string())
        .with_span(self.span_of(node))
    }

    /// Per-column marker for a reference that cannot be resolved.
    pub fn marker(&self, reference: impl Into<String>, reason: UnresolvedReason) -> Expression {
        Expression::Unresolved(
            UnresolvedReference::new(self.relation.clone(), reference, reason)
                .for_column(self.column.clone())
        )
    }
}

/// A `USING` / `NATURAL` join column and the sources that share it.
#[derive(Debug, Clone)]
pub struct MergedColumn {
    pub name:    CompactString,
    pub sources: Vec<usize>
}

/// Name bindings visible to the expressions of one `SELECT`.
#[derive(Debug, Default)]
pub struct Scope {
    pub sources: Vec<Source>,
    pub merged:  Vec<MergedColumn>
}

impl Scope {
    /// Source bound to `qualifier`: an alias, or the relation name when the
    /// FROM item has no alias.
    pub fn find(&self, qualifier: &str, schema: &Schema) -> Option<usize> {
        if let Some(idx) = self
            .sources
            .iter()
            .position(|s| s.alias.eq_ignore_ascii_case(qualifier))
        {
            return Some(idx);
        }
        let target = schema.get(qualifier)?;
        self.sources.iter().position(|s| {
            matches!(
                &s.target,
                SourceTarget::Relation { resolved: Some(name), .. }
                    if *name == target.name
            )
        })
    }

    pub fn merged(&self, name: &str) -> Option<&MergedColumn> {
        self.merged
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Reference to `column` in source `idx`, using the declared spelling
    /// when the source knows its columns.
    pub fn column_ref(&self, idx: usize, column: &str) -> ColumnRef {
        let source = &self.sources[idx];
        ColumnRef {
            source:    idx,
            qualifier: source.alias.clone(),
            column:    source
                .column_name(column)
                .cloned()
                .unwrap_or_else(|| column.into())
        }
    }

    /// Record that `name` is shared by the sources in `left` and `right`.
    pub fn merge(&mut self, name: &str, left: Range<usize>, right: Range<usize>) {
        let mut sources = match self.merged(name) {
            Some(existing) if existing.sources.iter().any(|s| left.contains(s)) => {
                existing.sources.clone()
            }
            _ => self.pick(name, left).into_iter().collect()
        };
        sources.extend(self.pick(name, right));
        if sources.is_empty() {
            return;
        }
        self.merged
            .retain(|m| !m.name.eq_ignore_ascii_case(name));
        self.merged.push(MergedColumn {
            name: name.into(),
            sources
        });
    }

    /// First source in `range` declaring `name`, else the first one with
    /// unknown columns.
    fn pick(&self, name: &str, range: Range<usize>) -> Option<usize> {
        range
            .clone()
            .find(|&i| self.sources[i].has_column(name))
            .or_else(|| range.into_iter().find(|&i| self.sources[i].columns.is_empty()))
    }
}
