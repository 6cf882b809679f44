use compact_str::CompactString;
use sqlparser::ast::{GroupByExpr, Query, Select, SelectItem, SetExpr};

use super::{
    ExtractionContext, Scope,
    expr::{collect_expr_relations, convert_expr, infer_name},
    table::extract_table_with_joins
};
use crate::{
    error::{ParseError, ParseErrorKind},
    query::types::{Expression, OutputColumn, SelectBody}
};

/// Extract a full query. `WITH` clauses are not interpreted.
pub fn extract_query(query: &Query, ctx: &mut ExtractionContext<'_>) -> Result<SelectBody, ParseError> {
    if let Some(with) = &query.with {
        return Err(ctx.unsupported("WITH", with));
    }
    extract_set_expr(&query.body, ctx)
}

fn extract_set_expr(set_expr: &SetExpr, ctx: &mut ExtractionContext<'_>) -> Result<SelectBody, ParseError> {
    match set_expr {
        SetExpr::Select(select) => extract_select(select, ctx),
        SetExpr::Query(query) => extract_query(query, ctx),
        SetExpr::SetOperation {
            op,
            set_quantifier,
            left,
            right
        } => {
            let quantifier = set_quantifier.to_string();
            let operator: CompactString = if quantifier.is_empty() {
                op.to_string().into()
            } else {
                format!("{} {}", op, quantifier).into()
            };
            let left_body = extract_set_expr(left, ctx)?;
            let right_body = extract_set_expr(right, ctx)?;
            if left_body.outputs.len() != right_body.outputs.len() {
                return Err(ParseError::new(
                    ctx.relation.clone(),
                    ParseErrorKind::SetOperationArity {
                        left:  left_body.outputs.len(),
                        right: right_body.outputs.len()
                    }
                )
                .with_fragment(right.to_string())
                .with_span(ctx.span_of(right.as_ref())));
            }
            Ok(combine(operator, left_body, right_body))
        }
        SetExpr::Values(values) => Err(ctx.unsupported("VALUES", values)),
        other => Err(ctx.unsupported("non-SELECT query body", other))
    }
}

/// Merge corresponding outputs of two set operation branches.
fn combine(operator: CompactString, left: SelectBody, mut right: SelectBody) -> SelectBody {
    let shift = left.sources.len();
    for join in &mut right.joins {
        for column in &mut join.columns {
            column.source += shift;
        }
    }
    let outputs = left
        .outputs
        .into_iter()
        .zip(right.outputs)
        .map(|(l, mut r)| {
            r.expression.shift_sources(shift);
            let branches = match l.expression {
                Expression::Combined {
                    operator: op,
                    mut branches
                } if op == operator => {
                    branches.push(r.expression);
                    branches
                }
                other => vec![other, r.expression]
            };
            let mut expression = Expression::Combined {
                operator: operator.clone(),
                branches
            };
            expression.relabel(&l.name);
            OutputColumn {
                text: format!("{} {} {}", l.text, operator, r.text),
                name: l.name,
                position: l.position,
                expression
            }
        })
        .collect();

    let mut sources = left.sources;
    sources.extend(right.sources);
    let mut joins = left.joins;
    joins.extend(right.joins);
    SelectBody {
        outputs,
        sources,
        joins,
        distinct: left.distinct || right.distinct || !operator.contains("ALL"),
        grouped: left.grouped || right.grouped
    }
}

fn extract_select(select: &Select, ctx: &mut ExtractionContext<'_>) -> Result<SelectBody, ParseError> {
    let mut scope = Scope::default();
    let mut joins = Vec::new();
    for twj in &select.from {
        ctx.column = None;
        extract_table_with_joins(twj, &mut scope, &mut joins, ctx)?;
    }
    ctx.column = None;
    if let Some(selection) = &select.selection {
        collect_expr_relations(selection, ctx);
    }
    if let Some(having) = &select.having {
        collect_expr_relations(having, ctx);
    }

    let mut outputs: Vec<OutputColumn> = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                let name = infer_name(expr);
                push_output(&mut outputs, name, expr, &scope, ctx)?;
            }
            SelectItem::ExprWithAlias {
                expr,
                alias
            } => {
                push_output(&mut outputs, alias.value.as_str().into(), expr, &scope, ctx)?;
            }
            SelectItem::Wildcard(options) => {
                if !options.to_string().trim().is_empty() {
                    return Err(ctx.unsupported("wildcard options", item));
                }
                expand_wildcard(&mut outputs, &scope, None, ctx, item)?;
            }
            SelectItem::QualifiedWildcard(..) => {
                let text = item.to_string();
                let qualifier = text.split_once(".*").map(|(q, _)| q).unwrap_or(&text);
                let Some(idx) = scope.find(qualifier, ctx.schema) else {
                    return Err(unexpandable(ctx, qualifier, item));
                };
                expand_wildcard(&mut outputs, &scope, Some(idx), ctx, item)?;
            }
        }
    }
    ctx.column = None;

    let grouped = match &select.group_by {
        GroupByExpr::All(_) => true,
        GroupByExpr::Expressions(exprs, _) => !exprs.is_empty()
    };
    Ok(SelectBody {
        outputs,
        sources: scope.sources,
        joins,
        distinct: select.distinct.is_some(),
        grouped
    })
}

fn push_output(
    outputs: &mut Vec<OutputColumn>,
    name: CompactString,
    expr: &sqlparser::ast::Expr,
    scope: &Scope,
    ctx: &mut ExtractionContext<'_>
) -> Result<(), ParseError> {
    ctx.column = Some(name.clone());
    let expression = convert_expr(expr, scope, ctx)?;
    outputs.push(OutputColumn {
        name,
        position: outputs.len() + 1,
        text: expr.to_string(),
        expression
    });
    Ok(())
}

/// Expand `*` over every source, or `alias.*` over source `only`.
///
/// A `USING` / `NATURAL` column appears once, at its first occurrence.
fn expand_wildcard(
    outputs: &mut Vec<OutputColumn>,
    scope: &Scope,
    only: Option<usize>,
    ctx: &ExtractionContext<'_>,
    item: &SelectItem
) -> Result<(), ParseError> {
    let indices: Vec<usize> = match only {
        Some(idx) => vec![idx],
        None => (0..scope.sources.len()).collect()
    };
    if indices.is_empty() {
        return Err(unexpandable(ctx, "*", item));
    }
    let mut emitted_merged: Vec<CompactString> = Vec::new();
    for idx in indices {
        let source = &scope.sources[idx];
        if source.columns.is_empty() {
            return Err(unexpandable(ctx, &source.alias, item));
        }
        for column in &source.columns {
            let merged = if only.is_none() {
                scope.merged(column)
            } else {
                None
            };
            let expression = match merged {
                Some(m) => {
                    if emitted_merged.iter().any(|e| e.eq_ignore_ascii_case(&m.name)) {
                        continue;
                    }
                    emitted_merged.push(m.name.clone());
                    Expression::Merged {
                        column: m.name.clone(),
                        refs:   m
                            .sources
                            .iter()
                            .map(|&i| scope.column_ref(i, column))
                            .collect()
                    }
                }
                None => Expression::Column(scope.column_ref(idx, column))
            };
            outputs.push(OutputColumn {
                name: column.clone(),
                position: outputs.len() + 1,
                text: format!("{}.{}", source.alias, column),
                expression
            });
        }
    }
    Ok(())
}

fn unexpandable(ctx: &ExtractionContext<'_>, qualifier: &str, item: &SelectItem) -> ParseError {
    ParseError::new(
        ctx.relation.clone(),
        ParseErrorKind::UnexpandableWildcard(qualifier.into())
    )
    .with_fragment(item.to_string())
    .with_span(ctx.span_of(item))
}
