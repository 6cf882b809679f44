//! Integration tests for the sql-lineage-analyzer binary.

use std::io::Write;

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use predicates::prelude::*;
use tempfile::{Builder, NamedTempFile};

const SCHEMA: &str = "
CREATE TABLE orders (id INT PRIMARY KEY, qty INT, price NUMERIC);
CREATE VIEW order_amounts AS SELECT id, qty * price AS amount FROM orders;
CREATE VIEW big_orders AS SELECT id, amount FROM order_amounts WHERE amount > 100;
";

fn cmd() -> Command {
    let mut cmd = cargo_bin_cmd!("sql-lineage-analyzer");
    cmd.env_remove("SQL_LINEAGE_DIALECT")
        .env_remove("SQL_LINEAGE_FORMAT")
        .env_remove("SQL_LINEAGE_DEFAULT_SCHEMA");
    cmd
}

fn schema_file(sql: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(".sql").tempfile().unwrap();
    writeln!(file, "{}", sql).unwrap();
    file
}

#[test]
fn test_analyze_success() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args(["analyze", "-s", schema.path().to_str().unwrap(), "--no-color"])
        .assert()
        .success()
        .stdout(predicate::str::contains("View big_orders"))
        .stdout(predicate::str::contains("Summary: 0 errors, 0 warnings"));
}

#[test]
fn test_analyze_unresolved_reference_exits_one() {
    let schema = schema_file(
        "CREATE TABLE t (a INT);\nCREATE VIEW v AS SELECT x.a FROM t;"
    );

    cmd()
        .args(["analyze", "-s", schema.path().to_str().unwrap(), "--no-color"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("[WARN]"));
}

#[test]
fn test_analyze_cycle_exits_two() {
    let mut catalog = Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        catalog,
        "relations:\n  - name: a\n    kind: view\n    definition: SELECT x FROM b\n  - name: b\n    kind: view\n    definition: SELECT x FROM a"
    )
    .unwrap();

    cmd()
        .args(["analyze", "-s", catalog.path().to_str().unwrap(), "--no-color"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("dependency cycle detected"));
}

#[test]
fn test_analyze_unparseable_view_in_ddl_is_localized() {
    let schema = schema_file(
        "CREATE TABLE t (a INT);\nCREATE VIEW good AS SELECT a FROM t;\nCREATE VIEW bad AS SELECT a FROM t WHERE a >>>> ;"
    );

    cmd()
        .args(["analyze", "-s", schema.path().to_str().unwrap(), "--no-color"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("View good"))
        .stdout(predicate::str::contains("[ERROR] parse error bad:"));
}

#[test]
fn test_analyze_file_not_found() {
    cmd()
        .args(["analyze", "-s", "/nonexistent/schema.sql"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_analyze_json_format() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args([
            "analyze",
            "-s",
            schema.path().to_str().unwrap(),
            "-f",
            "json"
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"lineage\""));
}

#[test]
fn test_analyze_yaml_format() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args([
            "analyze",
            "-s",
            schema.path().to_str().unwrap(),
            "-f",
            "yaml"
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("summary:"));
}

#[test]
fn test_format_from_environment() {
    let schema = schema_file(SCHEMA);

    cmd()
        .env("SQL_LINEAGE_FORMAT", "json")
        .args(["analyze", "-s", schema.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{"));
}

#[test]
fn test_trace_column() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args([
            "trace",
            "-s",
            schema.path().to_str().unwrap(),
            "-r",
            "big_orders",
            "-c",
            "amount",
            "--no-color"
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("computed in `order_amounts`"))
        .stdout(predicate::str::contains("orders.price"));
}

#[test]
fn test_trace_whole_relation() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args([
            "trace",
            "-s",
            schema.path().to_str().unwrap(),
            "-r",
            "order_amounts",
            "--no-color"
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("order_amounts.id: same as `orders.id`"))
        .stdout(predicate::str::contains("order_amounts.amount"));
}

#[test]
fn test_trace_unknown_column_fails() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args([
            "trace",
            "-s",
            schema.path().to_str().unwrap(),
            "-r",
            "big_orders",
            "-c",
            "nope"
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_trace_parse_failure_exits_two() {
    let mut catalog = Builder::new().suffix(".json").tempfile().unwrap();
    writeln!(
        catalog,
        r#"{{"relations": [{{"name": "v", "kind": "view", "definition": "SELEC x FROM t"}}]}}"#
    )
    .unwrap();

    cmd()
        .args(["trace", "-s", catalog.path().to_str().unwrap(), "-r", "v"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("lineage unavailable"));
}

#[test]
fn test_deps() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args([
            "deps",
            "-s",
            schema.path().to_str().unwrap(),
            "-r",
            "big_orders",
            "--no-color"
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("order_amounts (direct)"))
        .stdout(predicate::str::contains("orders (indirect)"));
}

#[test]
fn test_deps_reverse() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args([
            "deps",
            "-s",
            schema.path().to_str().unwrap(),
            "-r",
            "orders",
            "--reverse",
            "--no-color"
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("dependents of orders:"))
        .stdout(predicate::str::contains("big_orders (indirect)"));
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_analyze_verbose() {
    let schema = schema_file(SCHEMA);

    cmd()
        .args([
            "analyze",
            "-s",
            schema.path().to_str().unwrap(),
            "--verbose",
            "--no-color"
        ])
        .assert()
        .success();
}

#[test]
fn test_analyze_mysql_dialect() {
    let schema = schema_file("CREATE TABLE t (id INT PRIMARY KEY);\nCREATE VIEW v AS SELECT `id` FROM t;");

    cmd()
        .args([
            "analyze",
            "-s",
            schema.path().to_str().unwrap(),
            "--dialect",
            "mysql",
            "--no-color"
        ])
        .assert()
        .success();
}
