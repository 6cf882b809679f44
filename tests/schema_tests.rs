// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use std::io::Write;

use sql_lineage_analyzer::{
    error::UnresolvedReason,
    query::SqlDialect,
    schema::{Column, Relation, RelationKind, Schema}
};
use tempfile::Builder;

const DDL: &str = r#"
    CREATE TABLE customers (
        id INT PRIMARY KEY,
        name VARCHAR(255) NOT NULL
    );
    CREATE TABLE orders (
        id INT,
        customer_id INT,
        amount NUMERIC,
        PRIMARY KEY (id),
        FOREIGN KEY (customer_id) REFERENCES customers (id)
    );
    CREATE VIEW order_totals (customer, total) AS
        SELECT customer_id, sum(amount) FROM orders GROUP BY customer_id;
    COMMENT ON TABLE orders IS 'All orders';
"#;

#[test]
fn test_parse_ddl_tables_and_views() {
    let schema = Schema::parse(DDL, SqlDialect::PostgreSQL).unwrap();

    assert_eq!(schema.len(), 3);
    assert_eq!(schema.tables().count(), 2);
    assert_eq!(schema.views().count(), 1);
    let view = schema.get("order_totals").unwrap();
    assert_eq!(view.kind, RelationKind::View);
    assert_eq!(view.column_names().as_slice(), ["customer", "total"]);
}

#[test]
fn test_column_metadata() {
    let schema = Schema::parse(DDL, SqlDialect::PostgreSQL).unwrap();
    let columns = schema.columns("customers").unwrap();

    assert_eq!(columns[0].name, "id");
    assert_eq!(columns[0].ordinal, 1);
    assert_eq!(columns[1].ordinal, 2);
    assert!(!columns[1].is_nullable);
    assert!(columns[1].data_type.to_uppercase().starts_with("VARCHAR"));
}

#[test]
fn test_primary_keys() {
    let schema = Schema::parse(DDL, SqlDialect::PostgreSQL).unwrap();

    assert_eq!(schema.primary_key("customers").unwrap(), ["id"]);
    assert_eq!(schema.primary_key("orders").unwrap(), ["id"]);
    assert!(schema.primary_key("order_totals").is_none());
}

#[test]
fn test_foreign_keys_both_directions() {
    let schema = Schema::parse(DDL, SqlDialect::PostgreSQL).unwrap();

    let outgoing = schema.foreign_keys("orders");
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].from_column, "customer_id");
    assert_eq!(outgoing[0].to_relation, "customers");
    assert_eq!(outgoing[0].to_column, "id");

    let incoming = schema.referencing("customers");
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].from_relation, "orders");
    assert_eq!(schema.foreign_key_edges().len(), 1);
}

#[test]
fn test_comment_on_table() {
    let schema = Schema::parse(DDL, SqlDialect::PostgreSQL).unwrap();
    assert_eq!(
        schema.get("orders").unwrap().comment.as_deref(),
        Some("All orders")
    );
}

#[test]
fn test_lookup_qualified_and_unqualified() {
    let schema = Schema::from_relations(
        "public",
        vec![
            Relation::table("public.orders", vec![Column::new("id", "int")]),
            Relation::table("sales.regions", vec![Column::new("id", "int")]),
        ]
    )
    .unwrap();

    assert!(schema.contains("orders"));
    assert!(schema.contains("PUBLIC.ORDERS"));
    assert!(schema.contains("\"public\".\"orders\""));
    assert!(schema.contains("regions"));
    assert!(!schema.contains("public.regions"));
    assert!(!schema.contains("missing"));
}

#[test]
fn test_ambiguous_bare_name_is_not_resolved() {
    let schema = Schema::from_relations(
        "main",
        vec![
            Relation::table("a.items", vec![]),
            Relation::table("b.items", vec![]),
        ]
    )
    .unwrap();

    assert!(schema.get("items").is_none());
    assert!(schema.get("a.items").is_some());
}

#[test]
fn test_duplicate_relation_rejected() {
    let result = Schema::from_relations(
        "public",
        vec![
            Relation::table("orders", vec![]),
            Relation::table("ORDERS", vec![]),
        ]
    );
    assert!(result.is_err());
}

#[test]
fn test_dangling_foreign_keys() {
    let schema = Schema::from_relations(
        "public",
        vec![
            Relation::table("customers", vec![Column::new("id", "int")]),
            Relation::table(
                "orders",
                vec![
                    Column::new("customer_id", "int").references("customers", "uuid"),
                    Column::new("region_id", "int").references("regions", "id"),
                ]
            ),
        ]
    )
    .unwrap();

    let dangling = schema.dangling_foreign_keys();
    assert_eq!(dangling.len(), 2);
    assert_eq!(dangling[0].reason, UnresolvedReason::UnknownColumn);
    assert_eq!(dangling[0].column.as_deref(), Some("customer_id"));
    assert_eq!(dangling[1].reason, UnresolvedReason::UnknownRelation);
}

#[test]
fn test_view_columns_inferred_from_body() {
    let sql = r#"
        CREATE TABLE t (a INT, b INT);
        CREATE VIEW v AS SELECT a, a + b AS s FROM t;
        CREATE VIEW w AS SELECT * FROM v;
    "#;
    let schema = Schema::parse(sql, SqlDialect::Generic).unwrap();

    assert_eq!(schema.get("v").unwrap().column_names().as_slice(), ["a", "s"]);
    assert_eq!(schema.get("w").unwrap().column_names().as_slice(), ["a", "s"]);
}

#[test]
fn test_load_json_catalog() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{
            "default_schema": "public",
            "relations": [
                {{ "name": "public.orders", "kind": "table",
                   "columns": [ {{ "name": "id", "data_type": "int" }},
                                {{ "name": "customer_id", "data_type": "int",
                                   "references": {{ "relation": "public.customers", "column": "id" }} }} ],
                   "primary_key": ["id"] }},
                {{ "name": "public.customers", "kind": "table",
                   "columns": [ {{ "name": "id", "data_type": "int" }} ] }},
                {{ "name": "public.order_ids", "kind": "view",
                   "definition": "SELECT id FROM orders" }}
            ]
        }}"#
    )
    .unwrap();

    let schema = Schema::load(file.path(), SqlDialect::Generic, None).unwrap();
    assert_eq!(schema.len(), 3);
    assert_eq!(schema.columns("orders").unwrap()[1].ordinal, 2);
    assert_eq!(schema.referencing("customers").len(), 1);
    assert!(schema.get("order_ids").unwrap().is_view());
}

#[test]
fn test_load_yaml_catalog() {
    let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "relations:\n  - name: t\n    kind: table\n    columns:\n      - name: a\n  - name: v\n    kind: view\n    definition: SELECT a FROM t"
    )
    .unwrap();

    let schema = Schema::load(file.path(), SqlDialect::Generic, Some("app")).unwrap();
    assert_eq!(schema.default_schema(), "app");
    assert!(schema.get("app.t").is_some());
}

#[test]
fn test_load_sql_file() {
    let mut file = Builder::new().suffix(".sql").tempfile().unwrap();
    writeln!(file, "CREATE TABLE t (a INT);").unwrap();

    let schema = Schema::load(file.path(), SqlDialect::Generic, None).unwrap();
    assert!(schema.contains("t"));
}

#[test]
fn test_load_missing_file() {
    let result = Schema::load(
        std::path::Path::new("/nonexistent/schema.sql"),
        SqlDialect::Generic,
        None
    );
    assert!(result.is_err());
}

#[test]
fn test_invalid_ddl_is_error() {
    assert!(Schema::parse("CREATE TABLE (", SqlDialect::Generic).is_err());
}

#[test]
fn test_summary_lists_relations() {
    let schema = Schema::parse(DDL, SqlDialect::PostgreSQL).unwrap();
    let summary = schema.to_summary();
    assert!(summary.contains("TABLE: customers"));
    assert!(summary.contains("VIEW: order_totals"));
    assert!(summary.contains("REFERENCES customers(id)"));
}
