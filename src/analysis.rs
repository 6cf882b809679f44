//! Analysis driver: parse every view, build the graph, trace every column.
//!
//! Views are parsed in parallel. Lineage is traced wave by wave in
//! topological order: views in one wave are traced in parallel and only
//! read chains of earlier waves, which are inserted into the chain cache
//! between waves. Failures are collected, never fatal:
//!
//! - a view that fails to parse gets no lineage, and its dependents see a
//!   "lineage unavailable" step where they read it;
//! - views in or depending on a cycle get no lineage;
//! - unresolved references stay attached to the column they occur in.
//!
//! # Example
//!
//! ```
//! use sql_lineage_analyzer::{
//!     analysis::{AnalysisOptions, Analyzer, LineageStatus},
//!     schema::{Column, Relation, Schema}
//! };
//!
//! let schema = Schema::from_relations(
//!     "public",
//!     vec![
//!         Relation::table("t", vec![Column::new("a", "int")]),
//!         Relation::view("v", vec![], "SELECT a * 2 AS doubled FROM t"),
//!     ]
//! )
//! .unwrap();
//!
//! let analysis = Analyzer::new(schema, AnalysisOptions::default()).run();
//! assert_eq!(analysis.lineage["v"].status, LineageStatus::Available);
//! assert_eq!(analysis.exit_code(), 0);
//! ```

mod types;

use compact_str::CompactString;
use indexmap::IndexMap;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
pub use types::{
    AnalysisIssue, ColumnLineage, IssueKind, LineageStatus, Severity, ViewLineage
};

use crate::{
    error::ParseError,
    graph::DependencyGraph,
    lineage::{
        CalculationChain, ChainCache, LineageError, LineageTracer, chain_key, trace_wave,
        trace_wave_sequential
    },
    query::{ParsedQuery, SqlDialect, parse_view},
    schema::{Relation, Schema}
};

/// Options for an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub dialect:  SqlDialect,
    /// Parse and trace on the rayon thread pool
    pub parallel: bool
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            dialect:  SqlDialect::Generic,
            parallel: true
        }
    }
}

/// Runs the full pipeline over one schema.
pub struct Analyzer {
    schema:  Schema,
    options: AnalysisOptions
}

impl Analyzer {
    pub fn new(schema: Schema, options: AnalysisOptions) -> Self {
        Self {
            schema,
            options
        }
    }

    pub fn run(self) -> Analysis {
        let Self {
            schema,
            options
        } = self;

        let views: Vec<&Relation> = schema.views().collect();
        let results: Vec<(CompactString, Result<ParsedQuery, ParseError>)> = if options.parallel {
            views
                .par_iter()
                .map(|view| (view.name.clone(), parse_view(&schema, view, options.dialect)))
                .collect()
        } else {
            views
                .iter()
                .map(|view| (view.name.clone(), parse_view(&schema, view, options.dialect)))
                .collect()
        };

        let mut parsed = IndexMap::with_capacity(results.len());
        let mut parse_errors = IndexMap::new();
        for (name, result) in results {
            match result {
                Ok(query) => {
                    parsed.insert(name, query);
                }
                Err(error) => {
                    warn!("{}", error);
                    parse_errors.insert(name, error);
                }
            }
        }

        let graph = DependencyGraph::build(&schema, &parsed);

        let mut cache = ChainCache::new();
        for (level, wave) in graph.waves().iter().enumerate() {
            if wave.is_empty() {
                continue;
            }
            debug!("Tracing wave {}: {} views", level, wave.len());
            let chains = if options.parallel {
                trace_wave(&schema, &parsed, &graph, &cache, wave)
            } else {
                trace_wave_sequential(&schema, &parsed, &graph, &cache, wave)
            };
            for chain in chains {
                cache
                    .entry(chain_key(&chain.relation, &chain.column))
                    .or_insert(chain);
            }
        }

        let lineage = collect_lineage(&schema, &parsed, &parse_errors, &graph, &cache);
        info!(
            "Analyzed {} relations ({} views): {} parse errors, {} cycles, {} column chains",
            schema.len(),
            views.len(),
            parse_errors.len(),
            graph.cycles().len(),
            cache.len()
        );

        Analysis {
            schema,
            parsed,
            parse_errors,
            graph,
            lineage,
            cache
        }
    }
}

fn collect_lineage(
    schema: &Schema,
    parsed: &IndexMap<CompactString, ParsedQuery>,
    parse_errors: &IndexMap<CompactString, ParseError>,
    graph: &DependencyGraph,
    cache: &ChainCache
) -> IndexMap<CompactString, ViewLineage> {
    let mut lineage = IndexMap::new();
    for view in schema.views() {
        let outputs: Vec<CompactString> = match parsed.get(&view.name) {
            Some(query) => query.output_names().into_iter().collect(),
            None => view.column_names().into_iter().collect()
        };
        let failure = if let Some(error) = parse_errors.get(&view.name) {
            Some((
                LineageStatus::ParseFailed,
                LineageError::ParseFailed {
                    relation: view.name.clone(),
                    error:    error.clone()
                }
            ))
        } else {
            graph
                .blocking_cycle(&view.name)
                .map(|cycle| (LineageStatus::Cycle, LineageError::Cycle(cycle.clone())))
        };
        let entry = match failure {
            Some((status, error)) => ViewLineage {
                relation: view.name.clone(),
                status,
                columns: outputs
                    .into_iter()
                    .map(|column| ColumnLineage {
                        column,
                        chain: None,
                        error: Some(error.clone())
                    })
                    .collect()
            },
            None => ViewLineage {
                relation: view.name.clone(),
                status:   LineageStatus::Available,
                columns:  outputs
                    .into_iter()
                    .map(|column| {
                        let chain = cache.get(&chain_key(&view.name, &column)).cloned();
                        let error = match chain {
                            Some(_) => None,
                            None => Some(LineageError::UnknownColumn {
                                relation: view.name.clone(),
                                column:   column.clone()
                            })
                        };
                        ColumnLineage {
                            column,
                            chain,
                            error
                        }
                    })
                    .collect()
            }
        };
        lineage.insert(view.name.clone(), entry);
    }
    lineage
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub schema:       Schema,
    /// Successfully parsed views by relation name
    pub parsed:       IndexMap<CompactString, ParsedQuery>,
    pub parse_errors: IndexMap<CompactString, ParseError>,
    pub graph:        DependencyGraph,
    /// Per-view lineage in schema order
    pub lineage:      IndexMap<CompactString, ViewLineage>,
    cache:            ChainCache
}

impl Analysis {
    /// Chain of `relation.column` computed during the run.
    pub fn chain(&self, relation: &str, column: &str) -> Option<&CalculationChain> {
        let name = self.schema.get(relation)?.name.as_str();
        self.cache.get(&chain_key(name, column))
    }

    /// Tracer seeded with every chain computed during the run.
    pub fn tracer(&self) -> LineageTracer<'_> {
        LineageTracer::new(&self.schema, &self.parsed, &self.parse_errors, &self.graph)
            .with_cache(self.cache.clone())
    }

    /// Every finding, errors first, then in discovery order.
    pub fn issues(&self) -> Vec<AnalysisIssue> {
        let mut issues: Vec<AnalysisIssue> = self
            .parse_errors
            .values()
            .map(AnalysisIssue::from_parse_error)
            .collect();
        issues.extend(self.graph.cycles().iter().map(AnalysisIssue::from_cycle));
        for query in self.parsed.values() {
            for marker in query.unresolved() {
                issues.push(AnalysisIssue::from_unresolved(
                    &marker,
                    IssueKind::UnresolvedReference
                ));
            }
        }
        for marker in self.graph.dangling() {
            issues.push(AnalysisIssue::from_unresolved(marker, IssueKind::DanglingRelation));
        }
        for marker in self.schema.dangling_foreign_keys() {
            issues.push(AnalysisIssue::from_unresolved(
                &marker,
                IssueKind::DanglingForeignKey
            ));
        }
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        issues
    }

    /// Highest issue severity, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.issues().into_iter().map(|i| i.severity).max()
    }

    /// Process exit code: 2 for errors, 1 for warnings, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.max_severity() {
            Some(Severity::Error) => 2,
            Some(Severity::Warning) => 1,
            _ => 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn schema(relations: Vec<Relation>) -> Schema {
        Schema::from_relations("public", relations).unwrap()
    }

    #[test]
    fn test_sequential_and_parallel_runs_agree() {
        let relations = vec![
            Relation::table("t", vec![Column::new("a", "int"), Column::new("b", "int")]),
            Relation::view("v1", vec![], "SELECT a + b AS s FROM t"),
            Relation::view("v2", vec![], "SELECT s * 2 AS d FROM v1"),
        ];
        let parallel = Analyzer::new(schema(relations.clone()), AnalysisOptions::default()).run();
        let sequential = Analyzer::new(
            schema(relations),
            AnalysisOptions {
                dialect:  SqlDialect::Generic,
                parallel: false
            }
        )
        .run();
        assert_eq!(parallel.lineage, sequential.lineage);
    }

    #[test]
    fn test_issues_sorted_errors_first() {
        let analysis = Analyzer::new(
            schema(vec![
                Relation::table("t", vec![Column::new("a", "int")]),
                Relation::view("v1", vec![], "SELECT x.a FROM t"),
                Relation::view("v2", vec![], "SELEC a FROM t"),
            ]),
            AnalysisOptions::default()
        )
        .run();
        let issues = analysis.issues();
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[0].relation, "v2");
        assert!(issues.iter().any(|i| i.severity == Severity::Warning && i.relation == "v1"));
        assert_eq!(analysis.exit_code(), 2);
    }

    #[test]
    fn test_chain_lookup_uses_schema_names() {
        let analysis = Analyzer::new(
            schema(vec![
                Relation::table("t", vec![Column::new("a", "int")]),
                Relation::view("v", vec![], "SELECT a FROM t"),
            ]),
            AnalysisOptions::default()
        )
        .run();
        assert!(analysis.chain("public.v", "A").is_some());
        assert!(analysis.chain("missing", "a").is_none());
    }
}
