//! Column Lineage Tracer: per-column calculation chains.
//!
//! A chain starts at an output column of a view and follows every column
//! reference down to stored table columns:
//!
//! - a table column ends the path with a base-column step;
//! - a view column splices in that view's own chain, whose first step names
//!   the intermediate view;
//! - a column of a FROM subquery is traced in place, scoped by the
//!   subquery alias;
//! - composite expressions produce one computed (or aggregated) step with a
//!   branch per input, in the order the inputs appear in the expression;
//! - `USING` / `NATURAL` join columns produce a joined step with a branch
//!   per joined side.
//!
//! Chains are memoized per (relation, column). [`LineageTracer`] resolves
//! upstream chains on demand with an explicit work stack; the analysis
//! driver instead traces [`trace_wave`] by wave so each wave only reads
//! chains of earlier ones.
//!
//! # Example
//!
//! ```
//! use indexmap::IndexMap;
//! use sql_lineage_analyzer::{
//!     graph::DependencyGraph,
//!     lineage::{LineageTracer, StepOperation},
//!     query::{SqlDialect, parse_view},
//!     schema::{Column, Relation, Schema}
//! };
//!
//! let schema = Schema::from_relations(
//!     "public",
//!     vec![
//!         Relation::table("t", vec![Column::new("a", "int"), Column::new("b", "int")]),
//!         Relation::view("v", vec![], "SELECT a + b AS total FROM t"),
//!     ]
//! )
//! .unwrap();
//! let mut parsed = IndexMap::new();
//! for view in schema.views() {
//!     parsed.insert(view.name.clone(), parse_view(&schema, view, SqlDialect::Generic).unwrap());
//! }
//! let graph = DependencyGraph::build(&schema, &parsed);
//! let errors = IndexMap::new();
//!
//! let mut tracer = LineageTracer::new(&schema, &parsed, &errors, &graph);
//! let chain = tracer.trace("v", "total").unwrap();
//!
//! assert_eq!(chain.steps[0].operation, StepOperation::Computed);
//! assert_eq!(chain.steps[0].branches.len(), 2);
//! assert_eq!(chain.base_columns().len(), 2);
//! ```

mod types;

use compact_str::CompactString;
use indexmap::IndexMap;
use log::debug;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
pub use types::{Branch, CalculationChain, ChainStep, StepOperation, StepSource};

use crate::{
    error::{CycleError, ParseError, ParseErrorKind, UnresolvedReason, UnresolvedReference},
    graph::DependencyGraph,
    query::{ColumnRef, Expression, Leaf, OutputColumn, ParsedQuery, SelectBody, SourceTarget},
    schema::{Relation, Schema, normalize_identifier, normalize_name}
};

/// Memo key: normalized relation and column names.
pub type ChainKey = (CompactString, CompactString);

/// Chains computed so far.
pub type ChainCache = IndexMap<ChainKey, CalculationChain>;

pub fn chain_key(relation: &str, column: &str) -> ChainKey {
    (normalize_name(relation), normalize_identifier(column))
}

/// Why no chain can be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageError {
    #[error("relation '{0}' does not exist")]
    UnknownRelation(CompactString),
    #[error("column '{column}' does not exist in '{relation}'")]
    UnknownColumn {
        relation: CompactString,
        column:   CompactString
    },
    /// The view's definition could not be parsed
    #[error("lineage unavailable for '{relation}': {error}")]
    ParseFailed {
        relation: CompactString,
        error:    ParseError
    },
    /// The view is a member of, or depends on, a dependency cycle
    #[error("lineage unavailable: {0}")]
    Cycle(CycleError)
}

/// An upstream chain that has to be computed first.
struct Missing {
    relation: CompactString,
    column:   CompactString
}

/// Builds chains from parsed views, reading upstream chains from a cache.
///
/// In strict mode an uncached upstream chain is reported as [`Missing`];
/// otherwise it becomes a "lineage unavailable" step.
struct ChainBuilder<'a> {
    schema: &'a Schema,
    parsed: &'a IndexMap<CompactString, ParsedQuery>,
    graph:  &'a DependencyGraph,
    cache:  &'a ChainCache,
    strict: bool
}

impl ChainBuilder<'_> {
    fn build(&self, view: &ParsedQuery, output: &OutputColumn) -> Result<CalculationChain, Missing> {
        Ok(CalculationChain {
            relation: view.relation.clone(),
            column:   output.name.clone(),
            steps:    self.trace_output(&view.relation, None, &view.body, output)?
        })
    }

    fn trace_output(
        &self,
        relation: &CompactString,
        scope: Option<&CompactString>,
        body: &SelectBody,
        output: &OutputColumn
    ) -> Result<Vec<ChainStep>, Missing> {
        let step = |operation, source| {
            ChainStep::new(relation.clone(), operation, source)
                .with_scope(scope)
                .with_column(output.name.clone())
                .with_expression(output.text.clone())
        };
        let steps = match &output.expression {
            Expression::Column(r) => {
                let mut steps = vec![step(StepOperation::DirectReference, StepSource::Derived)];
                steps.extend(self.resolve_ref(relation, scope, body, r)?);
                steps
            }
            Expression::Merged {
                refs, ..
            } => {
                let branches = self.joined_branches(relation, scope, body, refs)?;
                vec![step(StepOperation::Joined, StepSource::Derived).with_branches(branches)]
            }
            Expression::Unresolved(marker) => vec![step(
                StepOperation::Computed,
                StepSource::Unresolved(marker.clone())
            )],
            expression => {
                let operation = if expression.is_aggregate() {
                    StepOperation::Aggregated
                } else {
                    StepOperation::Computed
                };
                let leaves = expression.leaves();
                if leaves.is_empty() {
                    vec![step(operation, StepSource::Constant)]
                } else {
                    let mut branches = Vec::with_capacity(leaves.len());
                    for leaf in leaves {
                        branches.push(self.leaf_branch(relation, scope, body, leaf)?);
                    }
                    vec![step(operation, StepSource::Derived).with_branches(branches)]
                }
            }
        };
        Ok(steps)
    }

    fn leaf_branch(
        &self,
        relation: &CompactString,
        scope: Option<&CompactString>,
        body: &SelectBody,
        leaf: Leaf<'_>
    ) -> Result<Branch, Missing> {
        let branch = match leaf {
            Leaf::Column(r) => Branch {
                reference: r.to_string(),
                steps:     self.resolve_ref(relation, scope, body, r)?
            },
            Leaf::Merged {
                column,
                refs
            } => Branch {
                reference: column.to_string(),
                steps:     vec![
                    ChainStep::new(relation.clone(), StepOperation::Joined, StepSource::Derived)
                        .with_scope(scope)
                        .with_column(column.clone())
                        .with_expression(column.to_string())
                        .with_branches(self.joined_branches(relation, scope, body, refs)?),
                ]
            },
            Leaf::Unresolved(marker) => Branch {
                reference: marker.reference.clone(),
                steps:     vec![
                    ChainStep::new(
                        relation.clone(),
                        StepOperation::Computed,
                        StepSource::Unresolved(marker.clone())
                    )
                    .with_scope(scope)
                    .with_expression(marker.reference.clone()),
                ]
            }
        };
        Ok(branch)
    }

    fn joined_branches(
        &self,
        relation: &CompactString,
        scope: Option<&CompactString>,
        body: &SelectBody,
        refs: &[ColumnRef]
    ) -> Result<Vec<Branch>, Missing> {
        let mut branches = Vec::with_capacity(refs.len());
        for r in refs {
            branches.push(Branch {
                reference: r.to_string(),
                steps:     self.resolve_ref(relation, scope, body, r)?
            });
        }
        Ok(branches)
    }

    /// Follow a column reference out of `body`.
    fn resolve_ref(
        &self,
        relation: &CompactString,
        scope: Option<&CompactString>,
        body: &SelectBody,
        r: &ColumnRef
    ) -> Result<Vec<ChainStep>, Missing> {
        let unresolved = |reason| {
            let marker = UnresolvedReference::new(relation.clone(), r.to_string(), reason);
            vec![
                ChainStep::new(
                    relation.clone(),
                    StepOperation::DirectReference,
                    StepSource::Unresolved(marker)
                )
                .with_scope(scope)
                .with_column(r.column.clone()),
            ]
        };
        let Some(source) = body.source(r.source) else {
            return Ok(unresolved(UnresolvedReason::UnknownAlias));
        };
        match &source.target {
            SourceTarget::Subquery(sub) => match sub.output(&r.column) {
                Some(output) => self.trace_output(relation, Some(&source.alias), sub, output),
                None => Ok(unresolved(UnresolvedReason::UnknownColumn))
            },
            SourceTarget::Relation {
                name,
                resolved
            } => {
                let Some(target) = resolved.as_deref().and_then(|n| self.schema.get(n)) else {
                    let marker = UnresolvedReference::new(
                        relation.clone(),
                        name.to_string(),
                        UnresolvedReason::UnknownRelation
                    );
                    return Ok(vec![
                        ChainStep::new(
                            name.clone(),
                            StepOperation::DirectReference,
                            StepSource::Unresolved(marker)
                        )
                        .with_column(r.column.clone()),
                    ]);
                };
                if target.is_view() {
                    return self.view_column(relation, target, &r.column);
                }
                match target.column(&r.column) {
                    Some(column) => Ok(vec![base_step(target, &column.name)]),
                    None if target.columns.is_empty() => Ok(vec![base_step(target, &r.column)]),
                    None => Ok(unresolved(UnresolvedReason::UnknownColumn))
                }
            }
        }
    }

    /// Splice in the chain of a column of another view.
    fn view_column(
        &self,
        relation: &CompactString,
        target: &Relation,
        column: &CompactString
    ) -> Result<Vec<ChainStep>, Missing> {
        let unavailable = |reason| {
            let marker = UnresolvedReference::new(
                relation.clone(),
                format!("{}.{}", target.name, column),
                reason
            );
            vec![
                ChainStep::new(
                    target.name.clone(),
                    StepOperation::DirectReference,
                    StepSource::Unresolved(marker)
                )
                .with_column(column.clone()),
            ]
        };
        if self.graph.blocking_cycle(&target.name).is_some() {
            return Ok(unavailable(UnresolvedReason::LineageUnavailable));
        }
        let Some(parsed) = self.parsed.get(&target.name) else {
            return Ok(unavailable(UnresolvedReason::LineageUnavailable));
        };
        let Some(output) = parsed.output(column) else {
            return Ok(unavailable(UnresolvedReason::UnknownColumn));
        };
        match self.cache.get(&chain_key(&target.name, &output.name)) {
            Some(chain) => Ok(chain.steps.clone()),
            None if self.strict => Err(Missing {
                relation: target.name.clone(),
                column:   output.name.clone()
            }),
            None => Ok(unavailable(UnresolvedReason::LineageUnavailable))
        }
    }
}

fn base_step(table: &Relation, column: &str) -> ChainStep {
    ChainStep::new(
        table.name.clone(),
        StepOperation::DirectReference,
        StepSource::BaseColumn
    )
    .with_column(column)
}

/// On-demand tracer with memoization.
pub struct LineageTracer<'a> {
    schema:       &'a Schema,
    parsed:       &'a IndexMap<CompactString, ParsedQuery>,
    parse_errors: &'a IndexMap<CompactString, ParseError>,
    graph:        &'a DependencyGraph,
    cache:        ChainCache
}

impl<'a> LineageTracer<'a> {
    pub fn new(
        schema: &'a Schema,
        parsed: &'a IndexMap<CompactString, ParsedQuery>,
        parse_errors: &'a IndexMap<CompactString, ParseError>,
        graph: &'a DependencyGraph
    ) -> Self {
        Self {
            schema,
            parsed,
            parse_errors,
            graph,
            cache: ChainCache::new()
        }
    }

    /// Start from chains computed elsewhere.
    #[must_use]
    pub fn with_cache(mut self, cache: ChainCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &ChainCache {
        &self.cache
    }

    /// Calculation chain of `relation.column`.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError`] when the relation or column does not exist,
    /// the view failed to parse, or the view is blocked by a cycle
    pub fn trace(&mut self, relation: &str, column: &str) -> Result<CalculationChain, LineageError> {
        let Some(target) = self.schema.get(relation) else {
            return Err(LineageError::UnknownRelation(relation.into()));
        };
        if !target.is_view() {
            let name = match target.column(column) {
                Some(col) => col.name.clone(),
                None if target.columns.is_empty() => column.into(),
                None => {
                    return Err(LineageError::UnknownColumn {
                        relation: target.name.clone(),
                        column:   column.into()
                    });
                }
            };
            return Ok(CalculationChain {
                relation: target.name.clone(),
                column:   name.clone(),
                steps:    vec![base_step(target, &name)]
            });
        }
        let parsed = self.traceable(target)?;
        let Some(output) = parsed.output(column) else {
            return Err(LineageError::UnknownColumn {
                relation: target.name.clone(),
                column:   column.into()
            });
        };
        let root = chain_key(&target.name, &output.name);
        let mut stack = vec![(target.name.clone(), output.name.clone())];
        while let Some((view, col)) = stack.last().cloned() {
            let key = chain_key(&view, &col);
            if self.cache.contains_key(&key) {
                stack.pop();
                continue;
            }
            let builder = ChainBuilder {
                schema: self.schema,
                parsed: self.parsed,
                graph:  self.graph,
                cache:  &self.cache,
                strict: true
            };
            let outcome = match self
                .parsed
                .get(&view)
                .and_then(|p| p.output(&col).map(|o| (p, o)))
            {
                Some((p, o)) => builder.build(p, o),
                None => Ok(CalculationChain {
                    relation: view.clone(),
                    column:   col.clone(),
                    steps:    vec![]
                })
            };
            match outcome {
                Ok(chain) => {
                    self.cache.insert(key, chain);
                    stack.pop();
                }
                Err(missing) => {
                    if stack
                        .iter()
                        .any(|(v, c)| chain_key(v, c) == chain_key(&missing.relation, &missing.column))
                    {
                        let members = stack.iter().map(|(v, _)| v.clone()).collect();
                        return Err(LineageError::Cycle(CycleError {
                            members
                        }));
                    }
                    debug!("Tracing {}.{} first", missing.relation, missing.column);
                    stack.push((missing.relation, missing.column));
                }
            }
        }
        self.cache
            .get(&root)
            .cloned()
            .ok_or_else(|| LineageError::UnknownColumn {
                relation: target.name.clone(),
                column:   column.into()
            })
    }

    /// Chains of every output column of `relation`, in column order.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError`] under the same conditions as [`Self::trace`]
    pub fn trace_relation(&mut self, relation: &str) -> Result<Vec<CalculationChain>, LineageError> {
        let Some(target) = self.schema.get(relation) else {
            return Err(LineageError::UnknownRelation(relation.into()));
        };
        let columns: Vec<CompactString> = if target.is_view() {
            self.traceable(target)?.output_names().into_iter().collect()
        } else {
            target.column_names().into_iter().collect()
        };
        columns
            .iter()
            .map(|column| self.trace(&target.name, column))
            .collect()
    }

    fn traceable(&self, view: &Relation) -> Result<&'a ParsedQuery, LineageError> {
        if let Some(cycle) = self.graph.blocking_cycle(&view.name) {
            return Err(LineageError::Cycle(cycle.clone()));
        }
        if let Some(error) = self.parse_errors.get(&view.name) {
            return Err(LineageError::ParseFailed {
                relation: view.name.clone(),
                error:    error.clone()
            });
        }
        self.parsed
            .get(&view.name)
            .ok_or_else(|| LineageError::ParseFailed {
                relation: view.name.clone(),
                error:    ParseError::new(view.name.clone(), ParseErrorKind::MissingDefinition)
            })
    }
}

/// Trace every output column of `views` in parallel.
///
/// Upstream chains are read from `cache` only; callers insert the results
/// before tracing the next wave.
pub fn trace_wave(
    schema: &Schema,
    parsed: &IndexMap<CompactString, ParsedQuery>,
    graph: &DependencyGraph,
    cache: &ChainCache,
    views: &[CompactString]
) -> Vec<CalculationChain> {
    let builder = ChainBuilder {
        schema,
        parsed,
        graph,
        cache,
        strict: false
    };
    views
        .par_iter()
        .filter_map(|view| parsed.get(view))
        .flat_map_iter(|query| view_chains(&builder, query))
        .collect()
}

/// Sequential [`trace_wave`].
pub fn trace_wave_sequential(
    schema: &Schema,
    parsed: &IndexMap<CompactString, ParsedQuery>,
    graph: &DependencyGraph,
    cache: &ChainCache,
    views: &[CompactString]
) -> Vec<CalculationChain> {
    let builder = ChainBuilder {
        schema,
        parsed,
        graph,
        cache,
        strict: false
    };
    views
        .iter()
        .filter_map(|view| parsed.get(view))
        .flat_map(|query| view_chains(&builder, query))
        .collect()
}

fn view_chains(builder: &ChainBuilder<'_>, query: &ParsedQuery) -> Vec<CalculationChain> {
    query
        .outputs()
        .iter()
        .filter_map(|output| builder.build(query, output).ok())
        .collect()
}
