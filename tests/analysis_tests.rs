// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use sql_lineage_analyzer::{
    analysis::{Analysis, AnalysisOptions, Analyzer, IssueKind, LineageStatus, Severity},
    lineage::{LineageError, StepOperation},
    query::SqlDialect,
    schema::{Column, Relation, Schema}
};

fn run(views: &[(&str, &str)]) -> Analysis {
    let mut relations = vec![
        Relation::table(
            "orders",
            vec![
                Column::new("id", "int"),
                Column::new("qty", "int"),
                Column::new("price", "numeric"),
            ]
        ),
        Relation::table("customers", vec![Column::new("id", "int")]),
    ];
    relations.extend(
        views
            .iter()
            .map(|(name, sql)| Relation::view(*name, vec![], *sql))
    );
    let schema = Schema::from_relations("public", relations).unwrap();
    Analyzer::new(schema, AnalysisOptions::default()).run()
}

#[test]
fn test_clean_schema_has_no_issues() {
    let analysis = run(&[
        ("v1", "SELECT id, qty * price AS amount FROM orders"),
        ("v2", "SELECT sum(amount) AS total FROM v1"),
    ]);

    assert!(analysis.issues().is_empty());
    assert_eq!(analysis.max_severity(), None);
    assert_eq!(analysis.exit_code(), 0);
    assert!(analysis.lineage.values().all(|v| v.is_available()));

    let total = analysis.lineage["v2"].column("total").unwrap();
    let chain = total.chain.as_ref().unwrap();
    assert_eq!(chain.steps[0].operation, StepOperation::Aggregated);
    assert_eq!(chain.base_columns().len(), 2);
    assert!(total.error.is_none());
}

#[test]
fn test_lineage_follows_schema_order() {
    let analysis = run(&[
        ("z_view", "SELECT id FROM orders"),
        ("a_view", "SELECT id FROM z_view"),
    ]);
    let names: Vec<&str> = analysis.lineage.keys().map(|k| k.as_str()).collect();
    assert_eq!(names, ["z_view", "a_view"]);
}

#[test]
fn test_parse_failure_is_localized() {
    let analysis = run(&[
        ("good", "SELECT qty FROM orders"),
        ("bad", "SELECT qty FROM orders WHERE"),
        ("downstream", "SELECT qty FROM bad"),
    ]);

    assert!(analysis.lineage["good"].is_available());
    assert_eq!(analysis.lineage["bad"].status, LineageStatus::ParseFailed);
    assert!(analysis.parse_errors.contains_key("bad"));

    let downstream = &analysis.lineage["downstream"];
    assert!(downstream.is_available());
    let chain = downstream.columns[0].chain.as_ref().unwrap();
    assert_eq!(chain.unresolved().len(), 1);

    let issues = analysis.issues();
    assert_eq!(issues[0].kind, IssueKind::ParseError);
    assert_eq!(issues[0].relation, "bad");
    assert_eq!(analysis.exit_code(), 2);
}

#[test]
fn test_cycle_blocks_members_and_dependents() {
    let analysis = run(&[
        ("a", "SELECT qty FROM b"),
        ("b", "SELECT qty FROM a"),
        ("c", "SELECT qty FROM a"),
        ("d", "SELECT qty FROM orders"),
    ]);

    for view in ["a", "b", "c"] {
        let lineage = &analysis.lineage[view];
        assert_eq!(lineage.status, LineageStatus::Cycle, "{}", view);
        assert!(matches!(lineage.columns[0].error, Some(LineageError::Cycle(_))));
    }
    assert!(analysis.lineage["d"].is_available());

    let cycles: Vec<_> = analysis
        .issues()
        .into_iter()
        .filter(|i| i.kind == IssueKind::Cycle)
        .collect();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].severity, Severity::Error);
    assert!(cycles[0].message.contains("a -> b -> a"));
    assert_eq!(analysis.exit_code(), 2);
}

#[test]
fn test_unresolved_reference_is_warning() {
    let analysis = run(&[("v", "SELECT o.qty, z.price FROM orders o")]);

    let issues = analysis.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Warning);
    assert_eq!(issues[0].kind, IssueKind::UnresolvedReference);
    assert_eq!(issues[0].column.as_deref(), Some("price"));
    assert_eq!(analysis.exit_code(), 1);
    assert!(analysis.lineage["v"].is_available());
}

#[test]
fn test_dangling_relation_is_warning() {
    let analysis = run(&[("v", "SELECT m.id FROM missing m")]);

    let issues = analysis.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, IssueKind::DanglingRelation);
    assert_eq!(analysis.exit_code(), 1);
}

#[test]
fn test_subquery_expression_is_informational() {
    let analysis = run(&[(
        "v",
        "SELECT id, (SELECT max(id) FROM customers) AS top FROM orders"
    )]);

    let issues = analysis.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, Severity::Info);
    assert_eq!(analysis.exit_code(), 0);
    assert_eq!(analysis.graph.dependencies("v"), ["orders", "customers"]);
}

#[test]
fn test_dangling_foreign_key_is_reported() {
    let schema = Schema::from_relations(
        "public",
        vec![Relation::table(
            "orders",
            vec![Column::new("region_id", "int").references("regions", "id")]
        )]
    )
    .unwrap();
    let analysis = Analyzer::new(schema, AnalysisOptions::default()).run();

    let issues = analysis.issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, IssueKind::DanglingForeignKey);
    assert_eq!(issues[0].relation, "orders");
}

#[test]
fn test_tracer_reuses_run_results() {
    let analysis = run(&[
        ("v1", "SELECT qty * price AS amount FROM orders"),
        ("v2", "SELECT amount FROM v1"),
    ]);
    let mut tracer = analysis.tracer();

    let chain = tracer.trace("v2", "amount").unwrap();
    assert_eq!(Some(&chain), analysis.chain("v2", "amount"));
}

#[test]
fn test_sequential_run_matches_parallel_run() {
    let views = [
        ("v1", "SELECT id, qty * price AS amount FROM orders"),
        ("v2", "SELECT v1.amount, c.id FROM v1 JOIN customers c ON v1.id = c.id"),
        ("v3", "SELECT sum(amount) AS total FROM v2"),
    ];
    let parallel = run(&views);

    let schema = parallel.schema.clone();
    let sequential = Analyzer::new(
        schema,
        AnalysisOptions {
            dialect:  SqlDialect::Generic,
            parallel: false
        }
    )
    .run();

    assert_eq!(parallel.lineage, sequential.lineage);
    assert_eq!(parallel.issues(), sequential.issues());
}

#[test]
fn test_cte_inside_subquery_is_not_a_dependency() {
    let analysis = run(&[(
        "v",
        "SELECT id, (WITH best AS (SELECT id FROM customers) SELECT max(id) FROM BEST) AS m FROM orders"
    )]);

    assert_eq!(analysis.graph.dependencies("v"), ["orders", "customers"]);
    assert!(analysis.graph.dangling().is_empty());
    assert_eq!(analysis.exit_code(), 0);
}
