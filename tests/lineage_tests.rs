// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use compact_str::CompactString;
use indexmap::IndexMap;
use sql_lineage_analyzer::{
    error::{ParseError, UnresolvedReason},
    graph::DependencyGraph,
    lineage::{
        CalculationChain, ChainCache, LineageError, LineageTracer, StepOperation, StepSource,
        chain_key, trace_wave
    },
    query::{ParsedQuery, SqlDialect, parse_view},
    schema::{Column, Relation, Schema}
};

struct Fixture {
    schema: Schema,
    parsed: IndexMap<CompactString, ParsedQuery>,
    errors: IndexMap<CompactString, ParseError>,
    graph:  DependencyGraph
}

impl Fixture {
    fn new(relations: Vec<Relation>) -> Self {
        let schema = Schema::from_relations("public", relations).unwrap();
        let mut parsed = IndexMap::new();
        let mut errors = IndexMap::new();
        for view in schema.views() {
            match parse_view(&schema, view, SqlDialect::Generic) {
                Ok(query) => {
                    parsed.insert(view.name.clone(), query);
                }
                Err(error) => {
                    errors.insert(view.name.clone(), error);
                }
            }
        }
        let graph = DependencyGraph::build(&schema, &parsed);
        Self {
            schema,
            parsed,
            errors,
            graph
        }
    }

    fn tracer(&self) -> LineageTracer<'_> {
        LineageTracer::new(&self.schema, &self.parsed, &self.errors, &self.graph)
    }

    fn trace(&self, relation: &str, column: &str) -> CalculationChain {
        self.tracer().trace(relation, column).unwrap()
    }
}

fn sales() -> Vec<Relation> {
    vec![
        Relation::table(
            "orders",
            vec![
                Column::new("id", "int"),
                Column::new("customer_id", "int"),
                Column::new("qty", "int"),
                Column::new("price", "numeric"),
            ]
        ),
        Relation::table(
            "customers",
            vec![Column::new("id", "int"), Column::new("discount", "numeric")]
        ),
    ]
}

fn column(relation: &str, name: &str) -> (CompactString, CompactString) {
    (relation.into(), name.into())
}

fn with_views(views: &[(&str, &str)]) -> Vec<Relation> {
    let mut relations = sales();
    relations.extend(
        views
            .iter()
            .map(|(name, sql)| Relation::view(*name, vec![], *sql))
    );
    relations
}

#[test]
fn test_pass_through_column() {
    let fixture = Fixture::new(with_views(&[("v", "SELECT qty FROM orders")]));
    let chain = fixture.trace("v", "qty");

    assert_eq!(chain.steps.len(), 2);
    assert_eq!(chain.steps[0].operation, StepOperation::DirectReference);
    assert_eq!(chain.steps[1].source, StepSource::BaseColumn);
    assert_eq!(chain.steps[1].qualified_name(), "orders.qty");
    assert!(chain.is_pass_through());
    assert_eq!(chain.summary(), "same as `orders.qty` (no calculation)");
}

#[test]
fn test_computed_column_branches_follow_expression_order() {
    let fixture = Fixture::new(with_views(&[(
        "v",
        "SELECT x.price * (1 - y.discount) AS net FROM orders x JOIN customers y ON x.customer_id = y.id"
    )]));
    let chain = fixture.trace("v", "net");
    let step = &chain.steps[0];

    assert_eq!(step.operation, StepOperation::Computed);
    assert_eq!(step.branches.len(), 2);
    assert_eq!(step.branches[0].reference, "x.price");
    assert_eq!(step.branches[0].steps[0].qualified_name(), "orders.price");
    assert_eq!(step.branches[1].steps[0].qualified_name(), "customers.discount");
    assert_eq!(
        chain.base_columns(),
        [column("orders", "price"), column("customers", "discount")]
    );
}

#[test]
fn test_branch_order_is_expression_order_not_from_order() {
    let fixture = Fixture::new(with_views(&[(
        "v",
        "SELECT y.discount + x.qty AS s FROM orders x, customers y"
    )]));
    let chain = fixture.trace("v", "s");

    assert_eq!(chain.steps[0].branches[0].steps[0].relation, "customers");
    assert_eq!(chain.steps[0].branches[1].steps[0].relation, "orders");
}

#[test]
fn test_aggregated_column() {
    let fixture = Fixture::new(with_views(&[(
        "v",
        "SELECT customer_id, sum(qty * price) AS total FROM orders GROUP BY customer_id"
    )]));
    let chain = fixture.trace("v", "total");

    assert_eq!(chain.steps[0].operation, StepOperation::Aggregated);
    assert_eq!(chain.base_columns().len(), 2);
    assert!(chain.summary().starts_with("aggregated in `v`"));
}

#[test]
fn test_within_group_order_feeds_aggregate() {
    let fixture = Fixture::new(with_views(&[(
        "v",
        "SELECT percentile_cont(0.5) WITHIN GROUP (ORDER BY price) AS med FROM orders"
    )]));
    let chain = fixture.trace("v", "med");

    assert_eq!(chain.steps[0].operation, StepOperation::Aggregated);
    assert_eq!(chain.steps[0].source, StepSource::Derived);
    assert_eq!(chain.base_columns(), [column("orders", "price")]);
    assert!(chain.unresolved().is_empty());
}

#[test]
fn test_aggregate_filter_feeds_aggregate() {
    let fixture = Fixture::new(with_views(&[(
        "v",
        "SELECT count(*) FILTER (WHERE qty > 100) AS big FROM orders"
    )]));
    let chain = fixture.trace("v", "big");

    assert_eq!(chain.steps[0].operation, StepOperation::Aggregated);
    assert_eq!(chain.base_columns(), [column("orders", "qty")]);
}

#[test]
fn test_aggregate_argument_order_by_follows_arguments() {
    let fixture = Fixture::new(with_views(&[(
        "v",
        "SELECT string_agg(customer_id, ',' ORDER BY qty) AS ids FROM orders"
    )]));
    let chain = fixture.trace("v", "ids");

    assert_eq!(chain.steps[0].branches.len(), 2);
    assert_eq!(
        chain.base_columns(),
        [column("orders", "customer_id"), column("orders", "qty")]
    );
}

#[test]
fn test_constant_column() {
    let fixture = Fixture::new(with_views(&[("v", "SELECT 42 AS answer FROM orders")]));
    let chain = fixture.trace("v", "answer");

    assert_eq!(chain.steps.len(), 1);
    assert_eq!(chain.steps[0].source, StepSource::Constant);
    assert!(chain.base_columns().is_empty());
}

#[test]
fn test_chain_through_intermediate_views() {
    let fixture = Fixture::new(with_views(&[
        ("v1", "SELECT id, qty * price AS amount FROM orders"),
        ("v2", "SELECT amount FROM v1"),
        ("v3", "SELECT amount AS final_amount FROM v2"),
    ]));
    let chain = fixture.trace("v3", "final_amount");

    let relations: Vec<&str> = chain.steps.iter().map(|s| s.relation.as_str()).collect();
    assert_eq!(relations, ["v3", "v2", "v1"]);
    assert_eq!(chain.steps[2].operation, StepOperation::Computed);
    assert_eq!(chain.base_columns().len(), 2);
}

#[test]
fn test_derived_table_steps_are_scoped() {
    let fixture = Fixture::new(with_views(&[(
        "v",
        "SELECT s.total FROM (SELECT qty * price AS total FROM orders) s"
    )]));
    let chain = fixture.trace("v", "total");

    assert_eq!(chain.steps[1].scope.as_deref(), Some("s"));
    assert_eq!(chain.steps[1].qualified_name(), "v (s).total");
    assert_eq!(chain.steps[1].operation, StepOperation::Computed);
}

#[test]
fn test_using_join_column_is_joined_step() {
    let mut relations = sales();
    relations.push(Relation::table(
        "payments",
        vec![Column::new("customer_id", "int"), Column::new("paid", "numeric")]
    ));
    relations.push(Relation::view(
        "v",
        vec![],
        "SELECT customer_id FROM orders JOIN payments USING (customer_id)"
    ));
    let fixture = Fixture::new(relations);
    let chain = fixture.trace("v", "customer_id");

    assert_eq!(chain.steps[0].operation, StepOperation::Joined);
    assert_eq!(chain.steps[0].branches.len(), 2);
    assert!(chain.summary().starts_with("joined column `customer_id`"));
}

#[test]
fn test_unbound_alias_only_affects_its_column() {
    let fixture = Fixture::new(with_views(&[("v", "SELECT o.qty, z.price FROM orders o")]));

    let good = fixture.trace("v", "qty");
    assert!(good.unresolved().is_empty());

    let bad = fixture.trace("v", "price");
    let unresolved = bad.unresolved();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].reason, UnresolvedReason::UnknownAlias);
    assert!(bad.summary().starts_with("unresolved `z.price`"));
}

#[test]
fn test_every_leaf_is_existing_table_column() {
    let fixture = Fixture::new(with_views(&[
        ("v1", "SELECT o.id, o.qty * o.price AS amount, c.discount FROM orders o JOIN customers c ON o.customer_id = c.id"),
        ("v2", "SELECT id, amount * (1 - discount) AS net FROM v1"),
        ("v3", "SELECT sum(net) AS total FROM v2 UNION ALL SELECT sum(price) FROM orders"),
    ]));
    let mut tracer = fixture.tracer();

    for view in ["v1", "v2", "v3"] {
        for chain in tracer.trace_relation(view).unwrap() {
            for step in chain.terminal_steps() {
                assert_eq!(step.source, StepSource::BaseColumn, "{}", chain.column);
                let table = fixture.schema.get(&step.relation).unwrap();
                assert!(!table.is_view());
                assert!(table.has_column(step.column.as_deref().unwrap()));
            }
        }
    }
}

#[test]
fn test_tracing_is_idempotent() {
    let fixture = Fixture::new(with_views(&[
        ("v1", "SELECT qty * price AS amount FROM orders"),
        ("v2", "SELECT amount FROM v1"),
    ]));

    let first = fixture.trace("v2", "amount");
    let second = fixture.trace("v2", "amount");
    assert_eq!(first, second);

    let mut tracer = fixture.tracer();
    let third = tracer.trace("v2", "amount").unwrap();
    let fourth = tracer.trace("v2", "amount").unwrap();
    assert_eq!(third, fourth);
    assert_eq!(first, fourth);
}

#[test]
fn test_wave_tracing_matches_on_demand_tracing() {
    let fixture = Fixture::new(with_views(&[
        ("v1", "SELECT qty * price AS amount FROM orders"),
        ("v2", "SELECT amount + 1 AS bumped FROM v1"),
    ]));

    let mut cache = ChainCache::new();
    for wave in fixture.graph.waves() {
        for chain in trace_wave(&fixture.schema, &fixture.parsed, &fixture.graph, &cache, &wave) {
            cache.insert(chain_key(&chain.relation, &chain.column), chain);
        }
    }

    assert_eq!(cache[&chain_key("v2", "bumped")], fixture.trace("v2", "bumped"));
}

#[test]
fn test_cycle_blocks_lineage_but_not_unrelated_views() {
    let fixture = Fixture::new(with_views(&[
        ("a", "SELECT qty FROM b"),
        ("b", "SELECT qty FROM c"),
        ("c", "SELECT qty FROM a"),
        ("d", "SELECT qty FROM orders"),
    ]));
    let mut tracer = fixture.tracer();

    for view in ["a", "b", "c"] {
        let Err(LineageError::Cycle(cycle)) = tracer.trace(view, "qty") else {
            panic!("expected cycle error for {}", view);
        };
        assert_eq!(cycle.members, ["a", "b", "c"]);
    }
    assert!(tracer.trace("d", "qty").is_ok());
}

#[test]
fn test_parse_failure_upstream_is_marked_unavailable() {
    let fixture = Fixture::new(with_views(&[
        ("broken", "SELEC qty FROM orders"),
        ("v", "SELECT o.qty, b.qty AS other FROM orders o, broken b"),
    ]));
    let mut tracer = fixture.tracer();

    assert!(matches!(
        tracer.trace("broken", "qty"),
        Err(LineageError::ParseFailed { .. })
    ));
    assert!(tracer.trace("v", "qty").unwrap().unresolved().is_empty());
    let other = tracer.trace("v", "other").unwrap();
    assert_eq!(
        other.unresolved()[0].reason,
        UnresolvedReason::LineageUnavailable
    );
}

#[test]
fn test_unknown_relation_and_column() {
    let fixture = Fixture::new(with_views(&[("v", "SELECT qty FROM orders")]));
    let mut tracer = fixture.tracer();

    assert!(matches!(
        tracer.trace("missing", "qty"),
        Err(LineageError::UnknownRelation(_))
    ));
    assert!(matches!(
        tracer.trace("v", "nope"),
        Err(LineageError::UnknownColumn { .. })
    ));
    assert!(matches!(
        tracer.trace("orders", "nope"),
        Err(LineageError::UnknownColumn { .. })
    ));
}

#[test]
fn test_union_column_traces_each_branch() {
    let fixture = Fixture::new(with_views(&[(
        "v",
        "SELECT id FROM orders UNION SELECT id FROM customers"
    )]));
    let chain = fixture.trace("v", "id");

    assert_eq!(chain.steps[0].operation, StepOperation::Computed);
    assert_eq!(
        chain.base_columns(),
        [column("orders", "id"), column("customers", "id")]
    );
}
