//! Command execution.
//!
//! Each command loads the schema, runs the analysis and formats the
//! result. Nothing is printed here; callers print
//! [`CommandOutput::stdout`] and exit with [`CommandOutput::exit_code`].

use log::debug;

use super::{
    helpers::{load_schema, resolve_settings, start_spinner},
    types::{CommandOutput, Settings}
};
use crate::{
    analysis::{Analysis, AnalysisOptions, Analyzer},
    cli::CommonArgs,
    config::Config,
    error::{AppError, AppResult},
    lineage::LineageError,
    output::{DependencyReport, format_analysis, format_chains, format_dependencies}
};

fn analyze(args: &CommonArgs, settings: &Settings) -> AppResult<Analysis> {
    let schema = load_schema(args, settings)?;
    debug!(
        "Loaded {} relations from {}",
        schema.len(),
        args.schema.display()
    );
    let spinner = start_spinner(settings, "Analyzing views...");
    let analysis = Analyzer::new(
        schema,
        AnalysisOptions {
            dialect:  settings.dialect,
            parallel: settings.parallel
        }
    )
    .run();
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    Ok(analysis)
}

/// Run the `analyze` command.
///
/// Exit code reflects the highest issue severity: 2 for parse errors and
/// cycles, 1 for unresolved references.
pub fn run_analyze(args: &CommonArgs, config: &Config) -> AppResult<CommandOutput> {
    let settings = resolve_settings(args, config);
    let analysis = analyze(args, &settings)?;
    Ok(CommandOutput {
        exit_code: analysis.exit_code(),
        stdout:    format_analysis(&analysis, &settings.output)
    })
}

/// Run the `trace` command.
///
/// Unknown relations or columns are errors. A view without lineage (parse
/// failure or cycle) is reported with exit code 2; chains containing
/// unresolved references exit with 1.
pub fn run_trace(
    args: &CommonArgs,
    config: &Config,
    relation: &str,
    column: Option<&str>
) -> AppResult<CommandOutput> {
    let settings = resolve_settings(args, config);
    let analysis = analyze(args, &settings)?;
    let mut tracer = analysis.tracer();
    let result = match column {
        Some(column) => tracer.trace(relation, column).map(|chain| vec![chain]),
        None => tracer.trace_relation(relation)
    };
    match result {
        Ok(chains) => {
            let exit_code = if chains.iter().any(|c| !c.unresolved().is_empty()) {
                1
            } else {
                0
            };
            Ok(CommandOutput {
                exit_code,
                stdout: format_chains(&chains, &settings.output)
            })
        }
        Err(e @ (LineageError::ParseFailed { .. } | LineageError::Cycle(_))) => {
            Ok(CommandOutput {
                exit_code: 2,
                stdout:    e.to_string()
            })
        }
        Err(e) => Err(AppError::bad_request(e.to_string()))
    }
}

/// Run the `deps` command.
pub fn run_deps(
    args: &CommonArgs,
    config: &Config,
    relation: &str,
    reverse: bool
) -> AppResult<CommandOutput> {
    let settings = resolve_settings(args, config);
    let analysis = analyze(args, &settings)?;
    let Some(target) = analysis.schema.get(relation) else {
        return Err(AppError::bad_request(format!(
            "relation '{}' does not exist",
            relation
        )));
    };
    let graph = &analysis.graph;
    let report = if reverse {
        DependencyReport {
            relation:   &target.name,
            direction:  "dependents",
            direct:     graph.dependents(&target.name),
            transitive: graph.downstream(&target.name)
        }
    } else {
        DependencyReport {
            relation:   &target.name,
            direction:  "dependencies",
            direct:     graph.dependencies(&target.name),
            transitive: graph.upstream(&target.name)
        }
    };
    let exit_code = if graph.blocking_cycle(&target.name).is_some() {
        2
    } else {
        0
    };
    Ok(CommandOutput {
        exit_code,
        stdout: format_dependencies(&report, &settings.output)
    })
}
