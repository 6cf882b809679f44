use compact_str::CompactString;
use sqlparser::ast::{Join, JoinConstraint, JoinOperator, TableFactor, TableWithJoins};

use super::{ExtractionContext, Scope, expr::convert_expr, set_expr::extract_query};
use crate::{
    error::ParseError,
    preprocessor::strip_quotes,
    query::types::{JoinCondition, JoinKind, Leaf, Source, SourceTarget},
    schema::ColumnVec
};

/// Bind one comma-separated FROM item and its joins into `scope`.
pub fn extract_table_with_joins(
    twj: &TableWithJoins,
    scope: &mut Scope,
    joins: &mut Vec<JoinCondition>,
    ctx: &mut ExtractionContext<'_>
) -> Result<(), ParseError> {
    extract_table_factor(&twj.relation, scope, joins, ctx)?;
    for join in &twj.joins {
        extract_join(join, scope, joins, ctx)?;
    }
    Ok(())
}

fn extract_join(
    join: &Join,
    scope: &mut Scope,
    joins: &mut Vec<JoinCondition>,
    ctx: &mut ExtractionContext<'_>
) -> Result<(), ParseError> {
    let left_end = scope.sources.len();
    extract_table_factor(&join.relation, scope, joins, ctx)?;
    let right_end = scope.sources.len();
    let right = scope
        .sources
        .last()
        .map(|s| s.alias.clone())
        .unwrap_or_default();

    let (mut kind, constraint) = match &join.join_operator {
        JoinOperator::Join(c) | JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
        JoinOperator::Left(c) | JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
        JoinOperator::Right(c) | JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
        JoinOperator::FullOuter(c) => (JoinKind::Full, Some(c)),
        _ => (JoinKind::Other, None)
    };

    let mut condition = JoinCondition {
        kind,
        right,
        condition: None,
        using: ColumnVec::new(),
        columns: Vec::new(),
        unresolved: Vec::new()
    };
    match constraint {
        Some(JoinConstraint::On(expr)) => {
            ctx.column = None;
            let converted = convert_expr(expr, scope, ctx)?;
            for leaf in converted.leaves() {
                match leaf {
                    Leaf::Column(r) => condition.columns.push(r.clone()),
                    Leaf::Merged {
                        refs, ..
                    } => condition.columns.extend(refs.iter().cloned()),
                    Leaf::Unresolved(marker) => condition.unresolved.push(marker.clone())
                }
            }
            condition.condition = Some(expr.to_string());
        }
        Some(JoinConstraint::Using(names)) => {
            for name in names {
                let name = strip_quotes(&name.to_string());
                scope.merge(&name, 0..left_end, left_end..right_end);
                condition.using.push(name);
            }
        }
        Some(JoinConstraint::Natural) => {
            kind = JoinKind::Natural;
            let common: Vec<CompactString> = scope.sources[left_end..right_end]
                .iter()
                .flat_map(|s| s.columns.iter())
                .filter(|c| scope.sources[..left_end].iter().any(|s| s.has_column(c)))
                .cloned()
                .collect();
            for name in common {
                scope.merge(&name, 0..left_end, left_end..right_end);
                condition.using.push(name);
            }
        }
        Some(JoinConstraint::None) | None => {}
    }
    condition.kind = kind;
    joins.push(condition);
    Ok(())
}

fn extract_table_factor(
    factor: &TableFactor,
    scope: &mut Scope,
    joins: &mut Vec<JoinCondition>,
    ctx: &mut ExtractionContext<'_>
) -> Result<(), ParseError> {
    match factor {
        TableFactor::Table {
            name,
            alias,
            args,
            ..
        } => {
            if args.is_some() {
                return Err(ctx.unsupported("table function", factor));
            }
            if let Some(alias) = alias
                && !alias.columns.is_empty()
            {
                return Err(ctx.unsupported("column alias list", factor));
            }
            let name = strip_quotes(&name.to_string());
            let resolved = ctx.schema.get(&name);
            let columns = resolved.map(|r| r.column_names()).unwrap_or_default();
            let alias = alias
                .as_ref()
                .map(|a| CompactString::from(a.name.value.as_str()))
                .unwrap_or_else(|| name.rsplit('.').next().unwrap_or(&name).into());
            scope.sources.push(Source {
                alias,
                target: SourceTarget::Relation {
                    resolved: resolved.map(|r| r.name.clone()),
                    name
                },
                columns
            });
        }
        TableFactor::Derived {
            lateral,
            subquery,
            alias,
            ..
        } => {
            if *lateral {
                return Err(ctx.unsupported("LATERAL", factor));
            }
            if let Some(alias) = alias
                && !alias.columns.is_empty()
            {
                return Err(ctx.unsupported("column alias list", factor));
            }
            let alias: CompactString = alias
                .as_ref()
                .map(|a| a.name.value.as_str().into())
                .unwrap_or_else(|| format!("subquery_{}", scope.sources.len() + 1).into());
            let mut body = extract_query(subquery, ctx)?;
            for output in &mut body.outputs {
                let label: CompactString = format!("{}.{}", alias, output.name).into();
                output.expression.relabel(&label);
            }
            let columns = body.outputs.iter().map(|o| o.name.clone()).collect();
            scope.sources.push(Source {
                alias,
                target: SourceTarget::Subquery(Box::new(body)),
                columns
            });
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => extract_table_with_joins(table_with_joins, scope, joins, ctx)?,
        TableFactor::TableFunction {
            ..
        }
        | TableFactor::Function {
            ..
        }
        | TableFactor::UNNEST {
            ..
        } => return Err(ctx.unsupported("table function", factor)),
        _ => return Err(ctx.unsupported("FROM item", factor))
    }
    Ok(())
}
