use compact_str::CompactString;
use serde::Serialize;

use crate::{error::UnresolvedReference, schema::ColumnVec};

/// Structural model of one view definition.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedQuery {
    /// View the definition belongs to
    pub relation:             CompactString,
    /// Query body that was parsed
    pub sql:                  String,
    pub body:                 SelectBody,
    /// Relations read only inside expression subqueries
    /// (`WHERE x IN (SELECT ...)`, scalar subqueries)
    pub expression_relations: Vec<CompactString>
}

impl ParsedQuery {
    /// Output columns in position order.
    pub fn outputs(&self) -> &[OutputColumn] {
        &self.body.outputs
    }

    /// Output column by name (case-insensitive, first match).
    pub fn output(&self, name: &str) -> Option<&OutputColumn> {
        self.body.output(name)
    }

    pub fn output_names(&self) -> ColumnVec {
        self.body.outputs.iter().map(|o| o.name.clone()).collect()
    }

    /// Every relation the definition reads, as written.
    ///
    /// FROM items come first in FROM order (derived subqueries expanded in
    /// place), followed by relations only referenced from expressions.
    /// Repeated references are kept.
    pub fn relation_references(&self) -> Vec<CompactString> {
        let mut refs = Vec::new();
        self.body.collect_relations(&mut refs);
        refs.extend(self.expression_relations.iter().cloned());
        refs
    }

    /// Join conditions of the outermost query.
    pub fn joins(&self) -> &[JoinCondition] {
        &self.body.joins
    }

    /// Every unresolved marker of the definition.
    pub fn unresolved(&self) -> Vec<UnresolvedReference> {
        let mut markers = Vec::new();
        self.body.collect_unresolved(&mut markers);
        markers
    }

    /// Rename outputs positionally. Extra names are ignored.
    pub fn rename_outputs<S: AsRef<str>>(&mut self, names: &[S]) {
        for (output, name) in self.body.outputs.iter_mut().zip(names) {
            output.name = name.as_ref().into();
            output.expression.relabel(&output.name);
        }
    }
}

/// One `SELECT` (or the merged outputs of a set operation).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectBody {
    pub outputs:  Vec<OutputColumn>,
    /// FROM items in FROM order
    pub sources:  Vec<Source>,
    pub joins:    Vec<JoinCondition>,
    pub distinct: bool,
    pub grouped:  bool
}

impl SelectBody {
    pub fn output(&self, name: &str) -> Option<&OutputColumn> {
        self.outputs
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(name))
    }

    pub fn source(&self, idx: usize) -> Option<&Source> {
        self.sources.get(idx)
    }

    fn collect_relations(&self, out: &mut Vec<CompactString>) {
        for source in &self.sources {
            match &source.target {
                SourceTarget::Relation {
                    name, ..
                } => out.push(name.clone()),
                SourceTarget::Subquery(body) => body.collect_relations(out)
            }
        }
    }

    fn collect_unresolved(&self, out: &mut Vec<UnresolvedReference>) {
        for source in &self.sources {
            if let SourceTarget::Subquery(body) = &source.target {
                body.collect_unresolved(out);
            }
        }
        for join in &self.joins {
            out.extend(join.unresolved.iter().cloned());
        }
        for output in &self.outputs {
            for leaf in output.expression.leaves() {
                if let Leaf::Unresolved(marker) = leaf {
                    out.push(marker.clone());
                }
            }
        }
    }
}

/// A FROM item.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    /// Alias, or the bare relation name when none is given
    pub alias:   CompactString,
    pub target:  SourceTarget,
    /// Known column names; empty when the relation is unknown or has no
    /// column metadata
    pub columns: ColumnVec
}

impl Source {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Column name as declared by the source.
    pub fn column_name(&self, name: &str) -> Option<&CompactString> {
        self.columns.iter().find(|c| c.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTarget {
    /// A named table or view
    Relation {
        /// Name as written, quotes removed
        name:     CompactString,
        /// Schema relation it resolves to
        resolved: Option<CompactString>
    },
    /// A derived table (`FROM (SELECT ...) AS alias`)
    Subquery(Box<SelectBody>)
}

/// One output column of a query.
#[derive(Debug, Clone, Serialize)]
pub struct OutputColumn {
    pub name:       CompactString,
    /// One-based position
    pub position:   usize,
    /// Expression as written
    pub text:       String,
    pub expression: Expression
}

/// A column reference bound to a FROM item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    /// Index into the owning body's sources
    pub source:    usize,
    /// Alias of that source
    pub qualifier: CompactString,
    pub column:    CompactString
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.qualifier, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseBranch {
    pub condition: Expression,
    pub result:    Expression
}

/// Expression tree over source columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Column(ColumnRef),
    /// A `USING` / `NATURAL` join column shared by several sources
    Merged {
        column: CompactString,
        refs:   Vec<ColumnRef>
    },
    Literal(String),
    Binary {
        op:    String,
        left:  Box<Expression>,
        right: Box<Expression>
    },
    Unary {
        op:      String,
        operand: Box<Expression>
    },
    Function {
        name:      CompactString,
        args:      Vec<Expression>,
        aggregate: bool,
        distinct:  bool
    },
    Case {
        operand:   Option<Box<Expression>>,
        branches:  Vec<CaseBranch>,
        otherwise: Option<Box<Expression>>
    },
    Cast {
        operand:   Box<Expression>,
        data_type: String
    },
    /// `IS NULL`, `BETWEEN`, `IN`, `LIKE` and similar tests
    Predicate {
        text:     String,
        operands: Vec<Expression>
    },
    /// Corresponding outputs of set operation branches
    Combined {
        operator: CompactString,
        branches: Vec<Expression>
    },
    Unresolved(UnresolvedReference)
}

/// A column-bearing leaf of an [`Expression`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Leaf<'a> {
    Column(&'a ColumnRef),
    /// `USING` / `NATURAL` column shared by several sources
    Merged {
        column: &'a CompactString,
        refs:   &'a [ColumnRef]
    },
    Unresolved(&'a UnresolvedReference)
}

impl Expression {
    /// Column, merged-column and unresolved leaves in left-to-right order.
    pub fn leaves(&self) -> Vec<Leaf<'_>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<Leaf<'a>>) {
        match self {
            Self::Column(r) => out.push(Leaf::Column(r)),
            Self::Merged {
                column,
                refs
            } => out.push(Leaf::Merged {
                column,
                refs
            }),
            Self::Unresolved(marker) => out.push(Leaf::Unresolved(marker)),
            Self::Literal(_) => {}
            Self::Binary {
                left,
                right,
                ..
            } => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
            Self::Unary {
                operand, ..
            }
            | Self::Cast {
                operand, ..
            } => operand.collect_leaves(out),
            Self::Function {
                args, ..
            }
            | Self::Predicate {
                operands: args, ..
            }
            | Self::Combined {
                branches: args, ..
            } => {
                for arg in args {
                    arg.collect_leaves(out);
                }
            }
            Self::Case {
                operand,
                branches,
                otherwise
            } => {
                if let Some(operand) = operand {
                    operand.collect_leaves(out);
                }
                for branch in branches {
                    branch.condition.collect_leaves(out);
                    branch.result.collect_leaves(out);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.collect_leaves(out);
                }
            }
        }
    }

    /// Whether an aggregate function appears anywhere in the tree.
    pub fn is_aggregate(&self) -> bool {
        match self {
            Self::Function {
                aggregate: true, ..
            } => true,
            Self::Function {
                args, ..
            }
            | Self::Predicate {
                operands: args, ..
            }
            | Self::Combined {
                branches: args, ..
            } => args.iter().any(Self::is_aggregate),
            Self::Binary {
                left,
                right,
                ..
            } => left.is_aggregate() || right.is_aggregate(),
            Self::Unary {
                operand, ..
            }
            | Self::Cast {
                operand, ..
            } => operand.is_aggregate(),
            Self::Case {
                operand,
                branches,
                otherwise
            } => {
                operand.as_deref().is_some_and(Self::is_aggregate)
                    || branches
                        .iter()
                        .any(|b| b.condition.is_aggregate() || b.result.is_aggregate())
                    || otherwise.as_deref().is_some_and(Self::is_aggregate)
            }
            Self::Column(_)
            | Self::Merged {
                ..
            }
            | Self::Literal(_)
            | Self::Unresolved(_) => false
        }
    }

    /// Mutable visit of every node, parents first.
    fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expression)) {
        f(self);
        match self {
            Self::Binary {
                left,
                right,
                ..
            } => {
                left.walk_mut(f);
                right.walk_mut(f);
            }
            Self::Unary {
                operand, ..
            }
            | Self::Cast {
                operand, ..
            } => operand.walk_mut(f),
            Self::Function {
                args, ..
            }
            | Self::Predicate {
                operands: args, ..
            }
            | Self::Combined {
                branches: args, ..
            } => {
                for arg in args {
                    arg.walk_mut(f);
                }
            }
            Self::Case {
                operand,
                branches,
                otherwise
            } => {
                if let Some(operand) = operand {
                    operand.walk_mut(f);
                }
                for branch in branches {
                    branch.condition.walk_mut(f);
                    branch.result.walk_mut(f);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.walk_mut(f);
                }
            }
            Self::Column(_)
            | Self::Merged {
                ..
            }
            | Self::Literal(_)
            | Self::Unresolved(_) => {}
        }
    }

    /// Offset every column reference by `by` sources.
    pub(crate) fn shift_sources(&mut self, by: usize) {
        if by == 0 {
            return;
        }
        self.walk_mut(&mut |node| match node {
            Self::Column(r) => r.source += by,
            Self::Merged {
                refs, ..
            } => {
                for r in refs {
                    r.source += by;
                }
            }
            _ => {}
        });
    }

    /// Attribute every unresolved marker to output column `column`.
    pub(crate) fn relabel(&mut self, column: &CompactString) {
        self.walk_mut(&mut |node| {
            if let Self::Unresolved(marker) = node {
                marker.column = Some(column.clone());
            }
        });
    }
}

/// How two FROM items are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Natural,
    Other
}

/// A join between the preceding FROM items and `right`.
#[derive(Debug, Clone, Serialize)]
pub struct JoinCondition {
    pub kind:       JoinKind,
    /// Alias of the joined source
    pub right:      CompactString,
    /// `ON` condition as written
    pub condition:  Option<String>,
    /// `USING` columns, or the common columns of a `NATURAL` join
    pub using:      ColumnVec,
    /// Column references appearing in the `ON` condition
    pub columns:    Vec<ColumnRef>,
    pub unresolved: Vec<UnresolvedReference>
}
