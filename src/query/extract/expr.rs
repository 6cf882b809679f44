use compact_str::CompactString;
use sqlparser::ast::{
    DuplicateTreatment, Expr, FunctionArg, FunctionArgExpr, FunctionArgumentClause,
    FunctionArguments, Ident, Query, SetExpr, TableFactor
};

use super::{ExtractionContext, Scope};
use crate::{
    error::{ParseError, UnresolvedReason},
    preprocessor::strip_quotes,
    query::types::{CaseBranch, Expression}
};

/// Functions that collapse a group of rows into one value.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "any_value",
    "array_agg",
    "avg",
    "bit_and",
    "bit_or",
    "bool_and",
    "bool_or",
    "corr",
    "count",
    "count_if",
    "covar_pop",
    "covar_samp",
    "every",
    "group_concat",
    "json_agg",
    "json_object_agg",
    "jsonb_agg",
    "jsonb_object_agg",
    "listagg",
    "max",
    "median",
    "min",
    "mode",
    "percentile_cont",
    "percentile_disc",
    "stddev",
    "stddev_pop",
    "stddev_samp",
    "string_agg",
    "sum",
    "var_pop",
    "var_samp",
    "variance",
    "xmlagg"
];

/// Name PostgreSQL gives an output column written without an alias.
pub fn infer_name(expr: &Expr) -> CompactString {
    match expr {
        Expr::Identifier(ident) => ident.value.as_str().into(),
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|i| i.value.as_str().into())
            .unwrap_or_else(|| "?column?".into()),
        Expr::Nested(inner)
        | Expr::Cast {
            expr: inner, ..
        } => infer_name(inner),
        Expr::Function(func) => func
            .name
            .0
            .last()
            .map(|part| strip_quotes(&part.to_string()).to_lowercase().into())
            .unwrap_or_else(|| "?column?".into()),
        Expr::Case {
            ..
        } => "case".into(),
        _ => "?column?".into()
    }
}

fn is_aggregate_name(name: &str) -> bool {
    let bare = name.rsplit('.').next().unwrap_or(name).to_ascii_lowercase();
    AGGREGATE_FUNCTIONS.contains(&bare.as_str())
}

/// Convert a SQL expression into an [`Expression`] bound to `scope`.
///
/// Unresolvable references become markers on the current column; window
/// functions fail the whole view.
pub fn convert_expr(
    expr: &Expr,
    scope: &Scope,
    ctx: &mut ExtractionContext<'_>
) -> Result<Expression, ParseError> {
    let converted = match expr {
        Expr::Identifier(ident) => resolve_identifier(ident, scope, ctx),
        Expr::CompoundIdentifier(idents) => resolve_compound(idents, scope, ctx),
        Expr::Nested(inner) => convert_expr(inner, scope, ctx)?,
        Expr::Value(_)
        | Expr::TypedString {
            ..
        }
        | Expr::Interval {
            ..
        } => Expression::Literal(expr.to_string()),
        Expr::BinaryOp {
            left,
            op,
            right
        } => Expression::Binary {
            op:    op.to_string(),
            left:  Box::new(convert_expr(left, scope, ctx)?),
            right: Box::new(convert_expr(right, scope, ctx)?)
        },
        Expr::UnaryOp {
            op,
            expr: operand
        } => Expression::Unary {
            op:      op.to_string(),
            operand: Box::new(convert_expr(operand, scope, ctx)?)
        },
        Expr::Function(func) => {
            if func.over.is_some() {
                return Err(ctx.unsupported("window function", expr));
            }
            let name: CompactString = func.name.to_string().into();
            let mut args = Vec::new();
            let mut distinct = false;
            match &func.args {
                FunctionArguments::List(list) => {
                    distinct = matches!(
                        list.duplicate_treatment,
                        Some(DuplicateTreatment::Distinct)
                    );
                    for arg in &list.args {
                        match arg {
                            FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                            | FunctionArg::Named {
                                arg: FunctionArgExpr::Expr(e),
                                ..
                            } => args.push(convert_expr(e, scope, ctx)?),
                            _ => {}
                        }
                    }
                    for clause in &list.clauses {
                        if let FunctionArgumentClause::OrderBy(order_by) = clause {
                            for item in order_by {
                                args.push(convert_expr(&item.expr, scope, ctx)?);
                            }
                        }
                    }
                }
                FunctionArguments::Subquery(query) => {
                    collect_query_relations(query, ctx);
                    args.push(ctx.marker(query.to_string(), UnresolvedReason::Unsupported));
                }
                FunctionArguments::None => {}
            }
            for item in &func.within_group {
                args.push(convert_expr(&item.expr, scope, ctx)?);
            }
            if let Some(filter) = &func.filter {
                args.push(convert_expr(filter, scope, ctx)?);
            }
            Expression::Function {
                aggregate: is_aggregate_name(&name),
                name,
                args,
                distinct
            }
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            let operand = match operand {
                Some(e) => Some(Box::new(convert_expr(e, scope, ctx)?)),
                None => None
            };
            let mut branches = Vec::with_capacity(conditions.len());
            for when in conditions {
                branches.push(CaseBranch {
                    condition: convert_expr(&when.condition, scope, ctx)?,
                    result:    convert_expr(&when.result, scope, ctx)?
                });
            }
            let otherwise = match else_result {
                Some(e) => Some(Box::new(convert_expr(e, scope, ctx)?)),
                None => None
            };
            Expression::Case {
                operand,
                branches,
                otherwise
            }
        }
        Expr::Cast {
            expr: operand,
            data_type,
            ..
        } => Expression::Cast {
            operand:   Box::new(convert_expr(operand, scope, ctx)?),
            data_type: data_type.to_string()
        },
        Expr::Extract {
            expr: operand, ..
        } => builtin("extract", &[&**operand], scope, ctx)?,
        Expr::Ceil {
            expr: operand, ..
        } => builtin("ceil", &[&**operand], scope, ctx)?,
        Expr::Floor {
            expr: operand, ..
        } => builtin("floor", &[&**operand], scope, ctx)?,
        Expr::Trim {
            expr: operand, ..
        } => builtin("trim", &[&**operand], scope, ctx)?,
        Expr::Position {
            expr: operand,
            r#in
        } => builtin("position", &[&**operand, &**r#in], scope, ctx)?,
        Expr::Substring {
            expr: operand,
            substring_from,
            substring_for,
            ..
        } => {
            let mut operands: Vec<&Expr> = vec![&**operand];
            operands.extend(substring_from.as_deref());
            operands.extend(substring_for.as_deref());
            builtin("substring", &operands, scope, ctx)?
        }
        Expr::IsNull(operand)
        | Expr::IsNotNull(operand)
        | Expr::IsTrue(operand)
        | Expr::IsNotTrue(operand)
        | Expr::IsFalse(operand)
        | Expr::IsNotFalse(operand)
        | Expr::IsUnknown(operand)
        | Expr::IsNotUnknown(operand) => predicate(expr, &[&**operand], scope, ctx)?,
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => {
            predicate(expr, &[&**a, &**b], scope, ctx)?
        }
        Expr::Between {
            expr: operand,
            low,
            high,
            ..
        } => predicate(expr, &[&**operand, &**low, &**high], scope, ctx)?,
        Expr::InList {
            expr: operand,
            list,
            ..
        } => {
            let mut operands: Vec<&Expr> = vec![&**operand];
            operands.extend(list.iter());
            predicate(expr, &operands, scope, ctx)?
        }
        Expr::Like {
            expr: operand,
            pattern,
            ..
        }
        | Expr::ILike {
            expr: operand,
            pattern,
            ..
        }
        | Expr::SimilarTo {
            expr: operand,
            pattern,
            ..
        } => predicate(expr, &[&**operand, &**pattern], scope, ctx)?,
        Expr::InSubquery {
            expr: operand,
            subquery,
            ..
        } => {
            collect_query_relations(subquery, ctx);
            let operand = convert_expr(operand, scope, ctx)?;
            let nested = ctx.marker(subquery.to_string(), UnresolvedReason::Unsupported);
            Expression::Predicate {
                text:     expr.to_string(),
                operands: vec![operand, nested]
            }
        }
        Expr::Subquery(subquery)
        | Expr::Exists {
            subquery, ..
        } => {
            collect_query_relations(subquery, ctx);
            ctx.marker(expr.to_string(), UnresolvedReason::Unsupported)
        }
        Expr::Tuple(items) => {
            let items: Vec<&Expr> = items.iter().collect();
            builtin("row", &items, scope, ctx)?
        }
        Expr::Collate {
            expr: operand, ..
        } => convert_expr(operand, scope, ctx)?,
        _ => {
            collect_expr_relations(expr, ctx);
            ctx.marker(expr.to_string(), UnresolvedReason::Unsupported)
        }
    };
    Ok(converted)
}

fn builtin(
    name: &str,
    operands: &[&Expr],
    scope: &Scope,
    ctx: &mut ExtractionContext<'_>
) -> Result<Expression, ParseError> {
    let mut args = Vec::with_capacity(operands.len());
    for operand in operands {
        args.push(convert_expr(operand, scope, ctx)?);
    }
    Ok(Expression::Function {
        name: name.into(),
        args,
        aggregate: false,
        distinct: false
    })
}

fn predicate(
    expr: &Expr,
    operands: &[&Expr],
    scope: &Scope,
    ctx: &mut ExtractionContext<'_>
) -> Result<Expression, ParseError> {
    let mut converted = Vec::with_capacity(operands.len());
    for operand in operands {
        converted.push(convert_expr(operand, scope, ctx)?);
    }
    Ok(Expression::Predicate {
        text:     expr.to_string(),
        operands: converted
    })
}

/// Resolve an unqualified column name against every source in scope.
fn resolve_identifier(ident: &Ident, scope: &Scope, ctx: &ExtractionContext<'_>) -> Expression {
    let name = ident.value.as_str();
    if let Some(merged) = scope.merged(name) {
        return Expression::Merged {
            column: merged.name.clone(),
            refs:   merged
                .sources
                .iter()
                .map(|&idx| scope.column_ref(idx, name))
                .collect()
        };
    }
    let candidates: Vec<usize> = scope
        .sources
        .iter()
        .enumerate()
        .filter(|(_, s)| s.has_column(name))
        .map(|(idx, _)| idx)
        .collect();
    match candidates.as_slice() {
        [idx] => Expression::Column(scope.column_ref(*idx, name)),
        [] => {
            let unknown: Vec<usize> = scope
                .sources
                .iter()
                .enumerate()
                .filter(|(_, s)| s.columns.is_empty())
                .map(|(idx, _)| idx)
                .collect();
            match unknown.as_slice() {
                [idx] => Expression::Column(scope.column_ref(*idx, name)),
                _ => ctx.marker(name, UnresolvedReason::UnknownColumn)
            }
        }
        _ => ctx.marker(name, UnresolvedReason::AmbiguousColumn)
    }
}

/// Resolve `qualifier.column` (the qualifier may itself be qualified).
fn resolve_compound(idents: &[Ident], scope: &Scope, ctx: &ExtractionContext<'_>) -> Expression {
    let reference = idents
        .iter()
        .map(|i| i.value.as_str())
        .collect::<Vec<_>>()
        .join(".");
    let Some((column, qualifier)) = idents.split_last() else {
        return ctx.marker(reference, UnresolvedReason::UnknownColumn);
    };
    if qualifier.is_empty() {
        return resolve_identifier(column, scope, ctx);
    }
    let qualifier = qualifier
        .iter()
        .map(|i| i.value.as_str())
        .collect::<Vec<_>>()
        .join(".");
    let Some(idx) = scope.find(&qualifier, ctx.schema) else {
        return ctx.marker(reference, UnresolvedReason::UnknownAlias);
    };
    let source = &scope.sources[idx];
    if !source.columns.is_empty() && !source.has_column(&column.value) {
        return ctx.marker(reference, UnresolvedReason::UnknownColumn);
    }
    Expression::Column(scope.column_ref(idx, &column.value))
}

/// Record every relation a nested query reads as an expression relation.
pub fn collect_query_relations(query: &Query, ctx: &mut ExtractionContext<'_>) {
    let ctes: Vec<&str> = query
        .with
        .iter()
        .flat_map(|w| &w.cte_tables)
        .map(|cte| cte.alias.name.value.as_str())
        .collect();
    for cte in query.with.iter().flat_map(|w| &w.cte_tables) {
        collect_query_relations(&cte.query, ctx);
    }
    let mut found = Vec::new();
    collect_set_expr_relations(&query.body, ctx, &mut found);
    for name in found {
        if !ctes.iter().any(|cte| cte.eq_ignore_ascii_case(&name)) {
            ctx.expression_relations.insert(name);
        }
    }
}

fn collect_set_expr_relations(
    set_expr: &SetExpr,
    ctx: &mut ExtractionContext<'_>,
    found: &mut Vec<CompactString>
) {
    match set_expr {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_factor_relations(&twj.relation, ctx, found);
                for join in &twj.joins {
                    collect_factor_relations(&join.relation, ctx, found);
                }
            }
            for item in &select.projection {
                if let sqlparser::ast::SelectItem::UnnamedExpr(e)
                | sqlparser::ast::SelectItem::ExprWithAlias {
                    expr: e, ..
                } = item
                {
                    collect_expr_relations(e, ctx);
                }
            }
            if let Some(selection) = &select.selection {
                collect_expr_relations(selection, ctx);
            }
            if let Some(having) = &select.having {
                collect_expr_relations(having, ctx);
            }
        }
        SetExpr::Query(query) => collect_query_relations(query, ctx),
        SetExpr::SetOperation {
            left,
            right,
            ..
        } => {
            collect_set_expr_relations(left, ctx, found);
            collect_set_expr_relations(right, ctx, found);
        }
        _ => {}
    }
}

fn collect_factor_relations(
    factor: &TableFactor,
    ctx: &mut ExtractionContext<'_>,
    found: &mut Vec<CompactString>
) {
    match factor {
        TableFactor::Table {
            name, ..
        } => found.push(strip_quotes(&name.to_string())),
        TableFactor::Derived {
            subquery, ..
        } => collect_query_relations(subquery, ctx),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_factor_relations(&table_with_joins.relation, ctx, found);
            for join in &table_with_joins.joins {
                collect_factor_relations(&join.relation, ctx, found);
            }
        }
        _ => {}
    }
}

/// Record relations read by subqueries nested anywhere in `expr`.
pub fn collect_expr_relations(expr: &Expr, ctx: &mut ExtractionContext<'_>) {
    match expr {
        Expr::Subquery(query)
        | Expr::Exists {
            subquery: query, ..
        } => collect_query_relations(query, ctx),
        Expr::InSubquery {
            expr,
            subquery,
            ..
        } => {
            collect_expr_relations(expr, ctx);
            collect_query_relations(subquery, ctx);
        }
        Expr::BinaryOp {
            left,
            right,
            ..
        } => {
            collect_expr_relations(left, ctx);
            collect_expr_relations(right, ctx);
        }
        Expr::UnaryOp {
            expr, ..
        }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::Cast {
            expr, ..
        } => collect_expr_relations(expr, ctx),
        Expr::Between {
            expr,
            low,
            high,
            ..
        } => {
            collect_expr_relations(expr, ctx);
            collect_expr_relations(low, ctx);
            collect_expr_relations(high, ctx);
        }
        Expr::InList {
            expr,
            list,
            ..
        } => {
            collect_expr_relations(expr, ctx);
            for item in list {
                collect_expr_relations(item, ctx);
            }
        }
        Expr::Function(func) => {
            match &func.args {
                FunctionArguments::List(list) => {
                    for arg in &list.args {
                        if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                        | FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(e),
                            ..
                        } = arg
                        {
                            collect_expr_relations(e, ctx);
                        }
                    }
                }
                FunctionArguments::Subquery(query) => collect_query_relations(query, ctx),
                FunctionArguments::None => {}
            }
            if let Some(filter) = &func.filter {
                collect_expr_relations(filter, ctx);
            }
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(operand) = operand {
                collect_expr_relations(operand, ctx);
            }
            for when in conditions {
                collect_expr_relations(&when.condition, ctx);
                collect_expr_relations(&when.result, ctx);
            }
            if let Some(else_result) = else_result {
                collect_expr_relations(else_result, ctx);
            }
        }
        _ => {}
    }
}
