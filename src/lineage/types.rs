use compact_str::CompactString;
use serde::Serialize;

use crate::error::UnresolvedReference;

/// What a step does to its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOperation {
    /// Column copied unchanged
    DirectReference,
    /// Scalar expression over one or more inputs
    Computed,
    /// Expression containing an aggregate function
    Aggregated,
    /// `USING` / `NATURAL` join column taken from several sides
    Joined
}

impl std::fmt::Display for StepOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectReference => write!(f, "direct reference"),
            Self::Computed => write!(f, "computed"),
            Self::Aggregated => write!(f, "aggregated"),
            Self::Joined => write!(f, "joined")
        }
    }
}

/// Where a step's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    /// Derived from the steps that follow
    Derived,
    /// A stored table column; the chain ends here
    BaseColumn,
    /// A constant or a function without column inputs
    Constant,
    /// The input could not be traced
    Unresolved(UnresolvedReference)
}

/// One link of a calculation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStep {
    pub relation:   CompactString,
    /// Derived table alias when the step happens inside a FROM subquery
    pub scope:      Option<CompactString>,
    pub column:     Option<CompactString>,
    pub expression: Option<String>,
    pub operation:  StepOperation,
    pub source:     StepSource,
    /// One per contributing input, in source expression order
    pub branches:   Vec<Branch>
}

impl ChainStep {
    pub fn new(
        relation: impl Into<CompactString>,
        operation: StepOperation,
        source: StepSource
    ) -> Self {
        Self {
            relation: relation.into(),
            scope: None,
            column: None,
            expression: None,
            operation,
            source,
            branches: Vec::new()
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Option<&CompactString>) -> Self {
        self.scope = scope.cloned();
        self
    }

    #[must_use]
    pub fn with_column(mut self, column: impl Into<CompactString>) -> Self {
        self.column = Some(column.into());
        self
    }

    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    #[must_use]
    pub fn with_branches(mut self, branches: Vec<Branch>) -> Self {
        self.branches = branches;
        self
    }

    /// `relation.column`, or the scoped form `relation (alias).column`.
    pub fn qualified_name(&self) -> String {
        let column = self.column.as_deref().unwrap_or("?");
        match &self.scope {
            Some(scope) => format!("{} ({}).{}", self.relation, scope, column),
            None => format!("{}.{}", self.relation, column)
        }
    }
}

/// The derivation of one input of a composite step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    /// Input as written in the expression
    pub reference: String,
    pub steps:     Vec<ChainStep>
}

/// How one output column of a relation is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalculationChain {
    pub relation: CompactString,
    pub column:   CompactString,
    pub steps:    Vec<ChainStep>
}

impl CalculationChain {
    /// Steps that end a path: base columns, constants and unresolved inputs.
    pub fn terminal_steps(&self) -> Vec<&ChainStep> {
        let mut out = Vec::new();
        collect_terminals(&self.steps, &mut out);
        out
    }

    /// Base table columns reached, deduplicated, in order of first reach.
    pub fn base_columns(&self) -> Vec<(CompactString, CompactString)> {
        let mut out: Vec<(CompactString, CompactString)> = Vec::new();
        for step in self.terminal_steps() {
            if step.source != StepSource::BaseColumn {
                continue;
            }
            let entry = (
                step.relation.clone(),
                step.column.clone().unwrap_or_default()
            );
            if !out.contains(&entry) {
                out.push(entry);
            }
        }
        out
    }

    /// Every unresolved marker anywhere in the chain.
    pub fn unresolved(&self) -> Vec<&UnresolvedReference> {
        let mut out = Vec::new();
        visit_steps(&self.steps, &mut |step| {
            if let StepSource::Unresolved(marker) = &step.source {
                out.push(marker);
            }
        });
        out
    }

    /// Whether the column is a plain copy of a single base column.
    pub fn is_pass_through(&self) -> bool {
        self.steps.iter().all(|s| {
            s.operation == StepOperation::DirectReference && s.branches.is_empty()
        }) && self
            .steps
            .last()
            .is_some_and(|s| s.source == StepSource::BaseColumn)
    }

    /// One-line description of the derivation.
    pub fn summary(&self) -> String {
        if self.is_pass_through()
            && let Some(last) = self.steps.last()
        {
            return format!("same as `{}` (no calculation)", last.qualified_name());
        }
        let Some(step) = first_significant(&self.steps) else {
            return "no derivation".to_string();
        };
        let inputs = self
            .base_columns()
            .iter()
            .map(|(r, c)| format!("`{}.{}`", r, c))
            .collect::<Vec<_>>()
            .join(", ");
        let from = if inputs.is_empty() {
            String::new()
        } else {
            format!(" from {}", inputs)
        };
        let expression = step.expression.as_deref().unwrap_or("");
        match &step.source {
            StepSource::Unresolved(marker) => {
                format!("unresolved `{}`: {}", marker.reference, marker.reason)
            }
            StepSource::Constant => format!("constant `{}`", expression),
            _ => match step.operation {
                StepOperation::Joined => format!(
                    "joined column `{}` in `{}`{}",
                    step.column.as_deref().unwrap_or(""),
                    step.relation,
                    from
                ),
                operation => format!(
                    "{} in `{}` as `{}`{}",
                    operation, step.relation, expression, from
                )
            }
        }
    }
}

fn collect_terminals<'a>(steps: &'a [ChainStep], out: &mut Vec<&'a ChainStep>) {
    let Some(last) = steps.last() else {
        return;
    };
    if last.branches.is_empty() {
        out.push(last);
    } else {
        for branch in &last.branches {
            collect_terminals(&branch.steps, out);
        }
    }
}

fn visit_steps<'a>(steps: &'a [ChainStep], f: &mut impl FnMut(&'a ChainStep)) {
    for step in steps {
        f(step);
        for branch in &step.branches {
            visit_steps(&branch.steps, f);
        }
    }
}

/// First step that is not a plain copy.
fn first_significant(steps: &[ChainStep]) -> Option<&ChainStep> {
    steps
        .iter()
        .find(|s| {
            s.operation != StepOperation::DirectReference
                || !matches!(s.source, StepSource::Derived | StepSource::BaseColumn)
        })
}
