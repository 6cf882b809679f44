// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use clap::Parser;
use sql_lineage_analyzer::cli::{Cli, Commands, Dialect, Format};

#[test]
fn test_parse_analyze() {
    let cli = Cli::try_parse_from(["sql-lineage-analyzer", "analyze", "-s", "schema.sql"]).unwrap();
    let Commands::Analyze {
        common
    } = &cli.command
    else {
        panic!("expected analyze");
    };
    assert_eq!(common.schema.to_str(), Some("schema.sql"));
    assert!(common.dialect.is_none());
    assert!(!common.no_color);
    assert!(!common.full);
}

#[test]
fn test_parse_trace_with_column() {
    let cli = Cli::try_parse_from([
        "sql-lineage-analyzer",
        "trace",
        "-s",
        "schema.sql",
        "-r",
        "sales.monthly",
        "-c",
        "total",
        "--dialect",
        "postgresql",
        "-f",
        "json"
    ])
    .unwrap();
    let Commands::Trace {
        common,
        relation,
        column
    } = &cli.command
    else {
        panic!("expected trace");
    };
    assert_eq!(relation, "sales.monthly");
    assert_eq!(column.as_deref(), Some("total"));
    assert!(matches!(common.dialect, Some(Dialect::Postgresql)));
    assert!(matches!(common.output_format, Some(Format::Json)));
}

#[test]
fn test_parse_deps_reverse() {
    let cli = Cli::try_parse_from([
        "sql-lineage-analyzer",
        "deps",
        "--schema",
        "catalog.yaml",
        "--relation",
        "orders",
        "--reverse",
        "--no-color",
        "--full",
        "-v"
    ])
    .unwrap();
    let Commands::Deps {
        relation,
        reverse,
        ..
    } = &cli.command
    else {
        panic!("expected deps");
    };
    assert_eq!(relation, "orders");
    assert!(*reverse);
    let common = cli.command.common();
    assert!(common.no_color);
    assert!(common.full);
    assert!(common.verbose);
}

#[test]
fn test_schema_is_required() {
    assert!(Cli::try_parse_from(["sql-lineage-analyzer", "analyze"]).is_err());
}

#[test]
fn test_trace_requires_relation() {
    assert!(Cli::try_parse_from(["sql-lineage-analyzer", "trace", "-s", "s.sql"]).is_err());
}

#[test]
fn test_unknown_dialect_rejected() {
    let result = Cli::try_parse_from([
        "sql-lineage-analyzer",
        "analyze",
        "-s",
        "s.sql",
        "--dialect",
        "oracle"
    ]);
    assert!(result.is_err());
}

#[test]
fn test_dialect_debug() {
    let debug = format!("{:?}", Dialect::Clickhouse);
    assert!(debug.contains("Clickhouse"));
}
