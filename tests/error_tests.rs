// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use sql_lineage_analyzer::error::{
    CycleError, ParseError, ParseErrorKind, SourceSpan, UnresolvedReason, UnresolvedReference,
    config_error, extract_position, file_read_error, schema_load_error
};

#[test]
fn test_file_read_error() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error = file_read_error("/path/to/file.sql", io_error);
    assert!(!error.to_string().is_empty());
}

#[test]
fn test_schema_load_error() {
    let error = schema_load_error("Invalid syntax");
    assert!(!error.to_string().is_empty());
}

#[test]
fn test_schema_load_error_with_position() {
    let error = schema_load_error("Expected keyword at Line: 5, Column 10");
    assert!(!error.to_string().is_empty());
}

#[test]
fn test_config_error() {
    let error = config_error("Invalid configuration value");
    assert!(!error.to_string().is_empty());
}

#[test]
fn test_position_extraction_large_numbers() {
    let span = extract_position("Error at Line: 999, Column: 12345").unwrap();
    assert_eq!(
        span,
        SourceSpan {
            line:   999,
            column: 12345
        }
    );
    assert_eq!(span.to_string(), "line 999, column 12345");
}

#[test]
fn test_parse_error_display_names_view() {
    let error = ParseError::new("monthly", ParseErrorKind::Unsupported("WITH".into()))
        .with_fragment("WITH t AS (SELECT 1)");
    assert_eq!(
        error.to_string(),
        "cannot parse definition of 'monthly': unsupported construct: WITH"
    );
    assert_eq!(error.fragment, "WITH t AS (SELECT 1)");
    assert!(error.span.is_none());
}

#[test]
fn test_cycle_error_display_closes_loop() {
    let cycle = CycleError {
        members: vec!["a".into(), "b".into(), "c".into()]
    };
    assert_eq!(cycle.to_string(), "dependency cycle detected: a -> b -> c -> a");
    assert!(cycle.contains("B"));
    assert!(!cycle.contains("d"));
}

#[test]
fn test_unresolved_reference_display() {
    let marker = UnresolvedReference::new("v", "z.price", UnresolvedReason::UnknownAlias)
        .for_column(Some("price".into()));
    assert_eq!(marker.column.as_deref(), Some("price"));
    assert_eq!(
        marker.to_string(),
        "unresolved reference 'z.price' in 'v': alias is not bound in FROM clause"
    );
}

#[test]
fn test_errors_serialize_snake_case() {
    let error = ParseError::new("v", ParseErrorKind::NotAQuery);
    let json = serde_json::to_value(&error).unwrap();
    assert_eq!(json["kind"], "not_a_query");
    assert_eq!(json["relation"], "v");

    let reason = serde_json::to_value(UnresolvedReason::LineageUnavailable).unwrap();
    assert_eq!(reason, "lineage_unavailable");
}
