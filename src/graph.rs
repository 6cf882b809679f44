//! Dependency Graph Builder: which relations each view reads.
//!
//! Nodes are every relation of the schema (in schema order); an edge
//! `view -> relation` means the view's definition reads the relation.
//! Tables have no outgoing edges and are the roots of every topological
//! order.
//!
//! # Cycles
//!
//! Strongly connected components with more than one member, or a view
//! reading itself, are reported as [`CycleError`]s. Members are listed in
//! discovery order: depth-first from views in schema order, following
//! dependencies in FROM order. Views that are members of a cycle or depend
//! on one are *blocked* and excluded from topological waves.
//!
//! # Example
//!
//! ```
//! use indexmap::IndexMap;
//! use sql_lineage_analyzer::{
//!     graph::DependencyGraph,
//!     query::{SqlDialect, parse_view},
//!     schema::{Column, Relation, Schema}
//! };
//!
//! let schema = Schema::from_relations(
//!     "public",
//!     vec![
//!         Relation::table("t", vec![Column::new("a", "int")]),
//!         Relation::view("v1", vec![], "SELECT a FROM t"),
//!         Relation::view("v2", vec![], "SELECT a FROM v1"),
//!     ]
//! )
//! .unwrap();
//!
//! let mut parsed = IndexMap::new();
//! for view in schema.views() {
//!     parsed.insert(view.name.clone(), parse_view(&schema, view, SqlDialect::Generic).unwrap());
//! }
//!
//! let graph = DependencyGraph::build(&schema, &parsed);
//! assert_eq!(graph.edges().len(), 2);
//! assert_eq!(graph.topological_order().unwrap(), ["t", "v1", "v2"]);
//! assert_eq!(graph.downstream("t"), ["v1", "v2"]);
//! ```

use std::collections::VecDeque;

use compact_str::CompactString;
use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use petgraph::{
    Direction,
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
    visit::{Bfs, Reversed}
};
use serde::Serialize;

use crate::{
    error::{CycleError, UnresolvedReason, UnresolvedReference},
    query::ParsedQuery,
    schema::{Schema, lookup_key, normalize_name}
};

/// "`from` reads `to`".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyEdge {
    /// Dependent view
    pub from: CompactString,
    /// Relation it reads
    pub to:   CompactString
}

/// View dependency graph over a whole schema.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph:          DiGraph<CompactString, ()>,
    index:          IndexMap<CompactString, usize>,
    /// Schema that unqualified names resolve in
    default_schema: CompactString,
    /// Direct dependencies per node in first-reference order
    deps:           Vec<Vec<usize>>,
    is_view:        Vec<bool>,
    edges:          Vec<DependencyEdge>,
    dangling:       Vec<UnresolvedReference>,
    cycles:         Vec<CycleError>,
    /// Index into `cycles` of the cycle blocking each node
    blocked:        Vec<Option<usize>>,
    /// Longest dependency path to a root; `None` for blocked nodes
    levels:         Vec<Option<usize>>
}

impl DependencyGraph {
    /// Build the graph from parsed view definitions keyed by relation name.
    ///
    /// Views without an entry in `parsed` (failed parses) become nodes
    /// without dependencies.
    pub fn build(schema: &Schema, parsed: &IndexMap<CompactString, ParsedQuery>) -> Self {
        let count = schema.len();
        let mut graph = DiGraph::with_capacity(count, count);
        let mut index = IndexMap::with_capacity(count);
        let mut is_view = Vec::with_capacity(count);
        for relation in schema.relations() {
            let node = graph.add_node(relation.name.clone());
            index.insert(normalize_name(&relation.name), node.index());
            is_view.push(relation.is_view());
        }

        let mut deps = vec![Vec::new(); count];
        let mut seen = IndexSet::new();
        let mut edges = Vec::new();
        let mut dangling = Vec::new();
        for (from, relation) in schema.relations().enumerate() {
            let Some(query) = parsed.get(&relation.name) else {
                continue;
            };
            let mut missing = IndexSet::new();
            for reference in query.relation_references() {
                match schema.position(&reference) {
                    Some(to) => {
                        if seen.insert((from, to)) {
                            deps[from].push(to);
                            graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
                            edges.push(DependencyEdge {
                                from: relation.name.clone(),
                                to:   graph[NodeIndex::new(to)].clone()
                            });
                        }
                    }
                    None => {
                        if missing.insert(normalize_name(&reference)) {
                            warn!(
                                "View '{}' reads unknown relation '{}'",
                                relation.name, reference
                            );
                            dangling.push(UnresolvedReference::new(
                                relation.name.clone(),
                                reference.to_string(),
                                UnresolvedReason::UnknownRelation
                            ));
                        }
                    }
                }
            }
        }

        let mut built = Self {
            graph,
            index,
            default_schema: schema.default_schema().into(),
            deps,
            is_view,
            edges,
            dangling,
            cycles: Vec::new(),
            blocked: vec![None; count],
            levels: vec![None; count]
        };
        built.detect_cycles();
        built.assign_levels();
        debug!(
            "Dependency graph: {} relations, {} edges, {} cycles",
            count,
            built.edges.len(),
            built.cycles.len()
        );
        built
    }

    fn detect_cycles(&mut self) {
        let preorder = self.discovery_order();
        let mut cycles: Vec<Vec<usize>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .map(|scc| {
                let mut members: Vec<usize> = scc.into_iter().map(|n| n.index()).collect();
                members.sort_by_key(|&m| preorder[m]);
                members
            })
            .collect();
        cycles.sort_by_key(|members| preorder[members[0]]);

        for (ci, members) in cycles.iter().enumerate() {
            for &m in members {
                self.blocked[m] = Some(ci);
            }
        }
        for (ci, members) in cycles.iter().enumerate() {
            let mut queue: VecDeque<usize> = members.iter().copied().collect();
            while let Some(node) = queue.pop_front() {
                for dependent in self
                    .graph
                    .neighbors_directed(NodeIndex::new(node), Direction::Incoming)
                {
                    let d = dependent.index();
                    if self.blocked[d].is_none() {
                        self.blocked[d] = Some(ci);
                        queue.push_back(d);
                    }
                }
            }
        }

        self.cycles = cycles
            .into_iter()
            .map(|members| {
                let err = CycleError {
                    members: members
                        .into_iter()
                        .map(|m| self.graph[NodeIndex::new(m)].clone())
                        .collect()
                };
                warn!("{}", err);
                err
            })
            .collect();
    }

    /// Depth-first preorder from views in schema order.
    fn discovery_order(&self) -> Vec<usize> {
        let count = self.deps.len();
        let mut order = vec![usize::MAX; count];
        let mut counter = 0;
        for start in 0..count {
            if !self.is_view[start] || order[start] != usize::MAX {
                continue;
            }
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if order[node] != usize::MAX {
                    continue;
                }
                order[node] = counter;
                counter += 1;
                for &dep in self.deps[node].iter().rev() {
                    if order[dep] == usize::MAX {
                        stack.push(dep);
                    }
                }
            }
        }
        order
    }

    /// Kahn's algorithm over unblocked nodes, one level at a time.
    fn assign_levels(&mut self) {
        let count = self.deps.len();
        let mut remaining: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut current: Vec<usize> = (0..count)
            .filter(|&n| self.blocked[n].is_none() && remaining[n] == 0)
            .collect();
        let mut level = 0;
        while !current.is_empty() {
            let mut next = Vec::new();
            for &node in &current {
                self.levels[node] = Some(level);
                for dependent in self
                    .graph
                    .neighbors_directed(NodeIndex::new(node), Direction::Incoming)
                {
                    let d = dependent.index();
                    if self.blocked[d].is_some() {
                        continue;
                    }
                    remaining[d] -= 1;
                    if remaining[d] == 0 {
                        next.push(d);
                    }
                }
            }
            next.sort_unstable();
            current = next;
            level += 1;
        }
    }

    fn node(&self, name: &str) -> Option<usize> {
        lookup_key(&self.index, &self.default_schema, name).map(|idx| self.index[idx])
    }

    fn names(&self, mut nodes: Vec<usize>) -> Vec<CompactString> {
        nodes.sort_unstable();
        nodes.dedup();
        nodes
            .into_iter()
            .map(|n| self.graph[NodeIndex::new(n)].clone())
            .collect()
    }

    /// Deduplicated edges in first-reference order.
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// References to relations that do not exist in the schema.
    pub fn dangling(&self) -> &[UnresolvedReference] {
        &self.dangling
    }

    /// Every detected cycle, first discovered first.
    pub fn cycles(&self) -> &[CycleError] {
        &self.cycles
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// The cycle preventing `name` from being ordered, if any.
    pub fn blocking_cycle(&self, name: &str) -> Option<&CycleError> {
        let ci = self.blocked[self.node(name)?]?;
        self.cycles.get(ci)
    }

    /// Views that are cycle members or depend on a cycle, in schema order.
    pub fn blocked_views(&self) -> Vec<(CompactString, &CycleError)> {
        self.blocked
            .iter()
            .enumerate()
            .filter_map(|(n, ci)| {
                let ci = (*ci)?;
                Some((self.graph[NodeIndex::new(n)].clone(), &self.cycles[ci]))
            })
            .collect()
    }

    /// Relations `name` reads directly, in first-reference order.
    pub fn dependencies(&self, name: &str) -> Vec<CompactString> {
        let Some(idx) = self.node(name) else {
            return vec![];
        };
        self.deps[idx]
            .iter()
            .map(|&n| self.graph[NodeIndex::new(n)].clone())
            .collect()
    }

    /// Views reading `name` directly, in schema order.
    pub fn dependents(&self, name: &str) -> Vec<CompactString> {
        let Some(idx) = self.node(name) else {
            return vec![];
        };
        let nodes = self
            .graph
            .neighbors_directed(NodeIndex::new(idx), Direction::Incoming)
            .map(|n| n.index())
            .collect();
        self.names(nodes)
    }

    /// Everything `name` reads, directly or through other views.
    pub fn upstream(&self, name: &str) -> Vec<CompactString> {
        let Some(idx) = self.node(name) else {
            return vec![];
        };
        let start = NodeIndex::new(idx);
        let mut bfs = Bfs::new(&self.graph, start);
        let mut nodes = Vec::new();
        while let Some(n) = bfs.next(&self.graph) {
            if n != start {
                nodes.push(n.index());
            }
        }
        self.names(nodes)
    }

    /// Every view reading `name`, directly or through other views.
    pub fn downstream(&self, name: &str) -> Vec<CompactString> {
        let Some(idx) = self.node(name) else {
            return vec![];
        };
        let start = NodeIndex::new(idx);
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut nodes = Vec::new();
        while let Some(n) = bfs.next(reversed) {
            if n != start {
                nodes.push(n.index());
            }
        }
        self.names(nodes)
    }

    /// Longest dependency path from `name` to a root.
    pub fn level(&self, name: &str) -> Option<usize> {
        self.levels[self.node(name)?]
    }

    /// All relations leaf-first (tables and self-contained views first).
    ///
    /// # Errors
    ///
    /// Returns the first discovered [`CycleError`] when the views cannot be
    /// ordered
    pub fn topological_order(&self) -> Result<Vec<CompactString>, CycleError> {
        if let Some(cycle) = self.cycles.first() {
            return Err(cycle.clone());
        }
        let mut nodes: Vec<(usize, usize)> = self
            .levels
            .iter()
            .enumerate()
            .filter_map(|(n, level)| level.map(|l| (l, n)))
            .collect();
        nodes.sort_unstable();
        Ok(nodes
            .into_iter()
            .map(|(_, n)| self.graph[NodeIndex::new(n)].clone())
            .collect())
    }

    /// Unblocked views grouped by level; each wave reads only relations of
    /// earlier waves.
    pub fn waves(&self) -> Vec<Vec<CompactString>> {
        let mut waves: Vec<Vec<CompactString>> = Vec::new();
        for (n, level) in self.levels.iter().enumerate() {
            let Some(level) = *level else {
                continue;
            };
            if !self.is_view[n] {
                continue;
            }
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(self.graph[NodeIndex::new(n)].clone());
        }
        waves.retain(|w| !w.is_empty());
        waves
    }
}
