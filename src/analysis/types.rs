//! Types produced by a full analysis run.
//!
//! - [`Severity`] - Issue severity levels (Info, Warning, Error)
//! - [`IssueKind`] - Which check produced an issue
//! - [`AnalysisIssue`] - One reportable finding
//! - [`ViewLineage`] - Per-view lineage with its status

use compact_str::CompactString;
use serde::Serialize;

use crate::{
    error::{CycleError, ParseError, UnresolvedReason, UnresolvedReference},
    lineage::{CalculationChain, LineageError}
};

/// Severity level of an issue.
///
/// Ordered from lowest to highest severity. Exit codes are determined by
/// the highest severity found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    /// Informational, does not affect exit code
    Info,
    /// Reference that could not be resolved (exit code 1)
    Warning,
    /// Parse failure or dependency cycle (exit code 2)
    Error
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR")
        }
    }
}

/// Check that produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ParseError,
    Cycle,
    UnresolvedReference,
    /// FROM item naming a relation that is not in the schema
    DanglingRelation,
    /// Foreign key pointing at a missing table or column
    DanglingForeignKey
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseError => write!(f, "parse error"),
            Self::Cycle => write!(f, "cycle"),
            Self::UnresolvedReference => write!(f, "unresolved reference"),
            Self::DanglingRelation => write!(f, "dangling relation"),
            Self::DanglingForeignKey => write!(f, "dangling foreign key")
        }
    }
}

/// A single finding of an analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisIssue {
    pub severity: Severity,
    pub kind:     IssueKind,
    /// Relation the issue is attributed to
    pub relation: CompactString,
    /// Output column, for column-level issues
    pub column:   Option<CompactString>,
    pub message:  String
}

impl AnalysisIssue {
    pub fn from_parse_error(error: &ParseError) -> Self {
        let message = match error.span {
            Some(span) => format!("{} at {}", error.kind, span),
            None => error.kind.to_string()
        };
        Self {
            severity: Severity::Error,
            kind: IssueKind::ParseError,
            relation: error.relation.clone(),
            column: None,
            message
        }
    }

    pub fn from_cycle(cycle: &CycleError) -> Self {
        Self {
            severity: Severity::Error,
            kind:     IssueKind::Cycle,
            relation: cycle.members.first().cloned().unwrap_or_default(),
            column:   None,
            message:  cycle.to_string()
        }
    }

    /// Unsupported derivations are informational; everything else warns.
    pub fn from_unresolved(marker: &UnresolvedReference, kind: IssueKind) -> Self {
        let severity = match marker.reason {
            UnresolvedReason::Unsupported => Severity::Info,
            _ => Severity::Warning
        };
        Self {
            severity,
            kind,
            relation: marker.relation.clone(),
            column: marker.column.clone(),
            message: format!("'{}': {}", marker.reference, marker.reason)
        }
    }
}

/// Whether lineage could be computed for a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageStatus {
    Available,
    ParseFailed,
    Cycle
}

impl std::fmt::Display for LineageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::ParseFailed => write!(f, "parse failed"),
            Self::Cycle => write!(f, "blocked by cycle")
        }
    }
}

/// Lineage of one output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnLineage {
    pub column: CompactString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain:  Option<CalculationChain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:  Option<LineageError>
}

/// Lineage of every output column of a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewLineage {
    pub relation: CompactString,
    pub status:   LineageStatus,
    pub columns:  Vec<ColumnLineage>
}

impl ViewLineage {
    pub fn is_available(&self) -> bool {
        self.status == LineageStatus::Available
    }

    pub fn column(&self, name: &str) -> Option<&ColumnLineage> {
        self.columns
            .iter()
            .find(|c| c.column.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_issue_from_parse_error() {
        let error = ParseError::new("v", ParseErrorKind::NotAQuery);
        let issue = AnalysisIssue::from_parse_error(&error);
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(issue.relation, "v");
        assert_eq!(issue.message, "statement is not a query");
    }

    #[test]
    fn test_issue_from_unsupported_marker_is_info() {
        let marker = UnresolvedReference::new("v", "(SELECT 1)", UnresolvedReason::Unsupported);
        let issue = AnalysisIssue::from_unresolved(&marker, IssueKind::UnresolvedReference);
        assert_eq!(issue.severity, Severity::Info);
    }

    #[test]
    fn test_issue_from_cycle_names_first_member() {
        let cycle = CycleError {
            members: vec!["a".into(), "b".into()]
        };
        let issue = AnalysisIssue::from_cycle(&cycle);
        assert_eq!(issue.relation, "a");
        assert!(issue.message.contains("a -> b -> a"));
    }
}
