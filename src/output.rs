//! Result formatting for text, JSON and YAML output.
//!
//! Text output is meant for terminals: colored when enabled, with
//! calculation chains drawn as indented trees. With `condense` set,
//! pass-through columns are collapsed to a single "same as" line.
//! JSON and YAML output serialize the same report structure.

use colored::{ColoredString, Colorize};
use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{Analysis, AnalysisIssue, LineageStatus, Severity},
    error::CycleError,
    graph::DependencyEdge,
    lineage::{CalculationChain, ChainStep, LineageError, StepOperation, StepSource}
};

/// Output format for results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml
}

/// Output options
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format:   OutputFormat,
    pub colored:  bool,
    /// Collapse pass-through chains to a one-line summary
    pub condense: bool
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format:   OutputFormat::Text,
            colored:  true,
            condense: true
        }
    }
}

/// Counts shown at the top of a report.
#[derive(Debug, Serialize)]
pub struct ReportSummary {
    pub relations:    usize,
    pub tables:       usize,
    pub views:        usize,
    pub dependencies: usize,
    pub parse_errors: usize,
    pub cycles:       usize,
    pub errors:       usize,
    pub warnings:     usize
}

/// One column in a report.
#[derive(Debug, Serialize)]
pub struct ReportColumn<'a> {
    pub column:  &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain:   Option<&'a CalculationChain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:   Option<&'a LineageError>
}

/// One view in a report.
#[derive(Debug, Serialize)]
pub struct ReportView<'a> {
    pub status:  LineageStatus,
    pub level:   Option<usize>,
    pub columns: Vec<ReportColumn<'a>>
}

/// Serializable form of a whole [`Analysis`].
#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
    pub summary:      ReportSummary,
    /// Leaf-first order of all relations, absent when cycles exist
    pub order:        Option<Vec<CompactString>>,
    pub dependencies: &'a [DependencyEdge],
    pub cycles:       &'a [CycleError],
    pub issues:       Vec<AnalysisIssue>,
    pub lineage:      IndexMap<&'a str, ReportView<'a>>
}

impl<'a> AnalysisReport<'a> {
    pub fn new(analysis: &'a Analysis, opts: &OutputOptions) -> Self {
        let issues = analysis.issues();
        let summary = ReportSummary {
            relations:    analysis.schema.len(),
            tables:       analysis.schema.tables().count(),
            views:        analysis.schema.views().count(),
            dependencies: analysis.graph.edges().len(),
            parse_errors: analysis.parse_errors.len(),
            cycles:       analysis.graph.cycles().len(),
            errors:       count(&issues, Severity::Error),
            warnings:     count(&issues, Severity::Warning)
        };
        let lineage = analysis
            .lineage
            .iter()
            .map(|(name, view)| {
                let columns = view
                    .columns
                    .iter()
                    .map(|c| report_column(&c.column, c.chain.as_ref(), c.error.as_ref(), opts))
                    .collect();
                (name.as_str(), ReportView {
                    status: view.status,
                    level: analysis.graph.level(name),
                    columns
                })
            })
            .collect();
        Self {
            summary,
            order: analysis.graph.topological_order().ok(),
            dependencies: analysis.graph.edges(),
            cycles: analysis.graph.cycles(),
            issues,
            lineage
        }
    }
}

fn count(issues: &[AnalysisIssue], severity: Severity) -> usize {
    issues.iter().filter(|i| i.severity == severity).count()
}

fn report_column<'a>(
    column: &'a str,
    chain: Option<&'a CalculationChain>,
    error: Option<&'a LineageError>,
    opts: &OutputOptions
) -> ReportColumn<'a> {
    let summary = chain.map(CalculationChain::summary);
    let chain = chain.filter(|c| !(opts.condense && c.is_pass_through()));
    ReportColumn {
        column,
        summary,
        chain,
        error
    }
}

/// Format a full analysis based on output options
pub fn format_analysis(analysis: &Analysis, opts: &OutputOptions) -> String {
    let report = AnalysisReport::new(analysis, opts);
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(&report).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(&report).unwrap_or_default(),
        OutputFormat::Text => format_text_report(&report, opts)
    }
}

/// Format calculation chains of one relation
pub fn format_chains(chains: &[CalculationChain], opts: &OutputOptions) -> String {
    let columns: Vec<ReportColumn<'_>> = chains
        .iter()
        .map(|c| report_column(&c.column, Some(c), None, opts))
        .collect();
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(&columns).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(&columns).unwrap_or_default(),
        OutputFormat::Text => {
            let mut output = String::new();
            for chain in chains {
                push_chain_text(&mut output, chain, opts);
                output.push('\n');
            }
            output
        }
    }
}

/// Dependency listing for the `deps` command.
#[derive(Debug, Serialize)]
pub struct DependencyReport<'a> {
    pub relation:   &'a str,
    /// `dependents` when listing views that read the relation
    pub direction:  &'static str,
    pub direct:     Vec<CompactString>,
    pub transitive: Vec<CompactString>
}

/// Format the direct and transitive dependencies of a relation
pub fn format_dependencies(report: &DependencyReport<'_>, opts: &OutputOptions) -> String {
    match opts.format {
        OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(report).unwrap_or_default(),
        OutputFormat::Text => {
            let mut output = String::new();
            let header = format!("{} of {}:", report.direction, report.relation);
            output.push_str(&paint(&header, opts.colored, |s| s.bold()));
            output.push('\n');
            if report.transitive.is_empty() {
                output.push_str("  (none)\n");
            }
            for name in &report.transitive {
                let marker = if report.direct.contains(name) { "direct" } else { "indirect" };
                output.push_str(&format!("  {} ({})\n", name, marker));
            }
            output
        }
    }
}

fn format_text_report(report: &AnalysisReport<'_>, opts: &OutputOptions) -> String {
    let mut output = String::new();
    output.push_str(&paint("=== SQL Lineage Analysis ===", opts.colored, |s| s.bold()));
    output.push_str("\n\n");

    let totals = &report.summary;
    output.push_str(&format!(
        "Relations: {} ({} tables, {} views)\nDependencies: {}\n",
        totals.relations, totals.tables, totals.views, totals.dependencies
    ));
    if let Some(order) = &report.order {
        let names: Vec<&str> = order.iter().map(|n| n.as_str()).collect();
        output.push_str(&format!("Order: {}\n", names.join(", ")));
    }
    output.push('\n');

    if !report.issues.is_empty() {
        output.push_str(&paint("Issues:", opts.colored, |s| s.bold()));
        output.push('\n');
        for issue in &report.issues {
            let label = format!("[{}]", issue.severity);
            let label = match issue.severity {
                Severity::Error => paint(&label, opts.colored, |s| s.red().bold()),
                Severity::Warning => paint(&label, opts.colored, |s| s.yellow().bold()),
                Severity::Info => paint(&label, opts.colored, |s| s.blue())
            };
            let location = match &issue.column {
                Some(column) => format!("{}.{}", issue.relation, column),
                None => issue.relation.to_string()
            };
            output.push_str(&format!(
                "  {} {} {}: {}\n",
                label, issue.kind, location, issue.message
            ));
        }
        output.push('\n');
    }

    for (name, view) in &report.lineage {
        let header = format!("View {}", name);
        output.push_str(&paint(&header, opts.colored, |s| s.cyan().bold()));
        if view.status != LineageStatus::Available {
            output.push_str(&format!(" ({})", view.status));
        }
        output.push('\n');
        for column in &view.columns {
            match (&column.summary, column.error) {
                (Some(summary), _) => {
                    output.push_str(&format!("  {}: {}\n", column.column, summary));
                    if let Some(chain) = column.chain {
                        push_steps(&mut output, &chain.steps, 2, opts);
                    }
                }
                (None, Some(error)) if view.status == LineageStatus::Available => {
                    output.push_str(&format!("  {}: {}\n", column.column, error));
                }
                _ => {
                    output.push_str(&format!("  {}: lineage unavailable\n", column.column));
                }
            }
        }
        output.push('\n');
    }

    let summary_line = format!(
        "Summary: {} errors, {} warnings",
        totals.errors, totals.warnings
    );
    if opts.colored {
        let colored_line = if totals.errors > 0 {
            summary_line.red().bold()
        } else if totals.warnings > 0 {
            summary_line.yellow().bold()
        } else {
            summary_line.green().bold()
        };
        output.push_str(&colored_line.to_string());
    } else {
        output.push_str(&summary_line);
    }
    output.push('\n');
    output
}

fn push_chain_text(output: &mut String, chain: &CalculationChain, opts: &OutputOptions) {
    let header = format!("{}.{}", chain.relation, chain.column);
    output.push_str(&paint(&header, opts.colored, |s| s.cyan().bold()));
    output.push_str(&format!(": {}\n", chain.summary()));
    if !(opts.condense && chain.is_pass_through()) {
        push_steps(output, &chain.steps, 1, opts);
    }
}

fn push_steps(output: &mut String, steps: &[ChainStep], depth: usize, opts: &OutputOptions) {
    let indent = "  ".repeat(depth);
    for step in steps {
        let mut line = format!("{}- {} [{}]", indent, step.qualified_name(), step.operation);
        if let Some(expression) = &step.expression
            && step.operation != StepOperation::DirectReference
        {
            line.push_str(&format!(" {}", expression));
        }
        match &step.source {
            StepSource::BaseColumn => {
                line.push(' ');
                line.push_str(&paint("(base column)", opts.colored, |s| s.green()));
            }
            StepSource::Constant => line.push_str(" (constant)"),
            StepSource::Unresolved(marker) => {
                let text = format!("(unresolved '{}': {})", marker.reference, marker.reason);
                line.push(' ');
                line.push_str(&paint(&text, opts.colored, |s| s.yellow()));
            }
            StepSource::Derived => {}
        }
        output.push_str(&line);
        output.push('\n');
        for branch in &step.branches {
            output.push_str(&format!("{}  <- {}\n", indent, branch.reference));
            push_steps(output, &branch.steps, depth + 2, opts);
        }
    }
}

fn paint(text: &str, colored: bool, style: impl Fn(&str) -> ColoredString) -> String {
    if colored {
        style(text).to_string()
    } else {
        text.to_string()
    }
}
