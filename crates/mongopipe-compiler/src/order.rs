//! Sort, skip and limit stage construction.

use bson::{Bson, Document};
use sqlparser::ast::{Expr, Offset, OrderByExpr, Value};

use crate::columns::{column_name, ordinal, AggregateCall, AliasTable};
use crate::{predicate, CompileError};
use mongopipe_plan::Stage;

/// Build one sort stage; item order becomes key priority.
pub(crate) fn build_sort_stage(
    order_by: &[OrderByExpr],
    aliases: &AliasTable,
) -> Result<Stage, CompileError> {
    let mut keys = Document::new();
    for item in order_by {
        let field = sort_field(&item.expr, aliases)?;
        let direction = if item.asc.unwrap_or(true) { 1 } else { -1 };
        keys.insert(field, direction);
    }
    Ok(Stage::Sort { keys })
}

/// Three-way resolution, same as GROUP BY: ordinal through the select
/// list, aggregate through its select-list alias (default alias if the
/// select list never names it), bare column as itself.
fn sort_field(expr: &Expr, aliases: &AliasTable) -> Result<String, CompileError> {
    match expr {
        Expr::Value(Value::Number(text, _)) => {
            let position = ordinal(text)?;
            Ok(aliases.by_ordinal(position)?.alias.clone())
        }
        Expr::Function(func) => {
            let call = AggregateCall::from_function(func)?;
            Ok(aliases
                .aggregate_alias(&call)
                .map(|column| column.alias.clone())
                .unwrap_or_else(|| call.default_alias()))
        }
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => column_name(expr),
        other => Err(CompileError::UnsupportedShape(format!(
            "unsupported ORDER BY item: {other}"
        ))),
    }
}

/// Skip (offset) then limit, in that order: the offset must be applied
/// before the row cap.
pub(crate) fn build_pagination(
    limit: Option<&Expr>,
    offset: Option<&Offset>,
) -> Result<Vec<Stage>, CompileError> {
    let mut stages = Vec::new();
    if let Some(offset) = offset {
        stages.push(Stage::Skip {
            count: int_literal(&offset.value)?,
        });
    }
    if let Some(limit) = limit {
        stages.push(Stage::Limit {
            count: int_literal(limit)?,
        });
    }
    Ok(stages)
}

fn int_literal(expr: &Expr) -> Result<i64, CompileError> {
    match predicate::literal(expr)? {
        Bson::Int64(n) if n >= 0 => Ok(n),
        other => Err(CompileError::UnsupportedShape(format!(
            "LIMIT/OFFSET must be a non-negative integer, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use sqlparser::ast::{SetExpr, Statement};
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn parts(sql: &str) -> (AliasTable, Vec<OrderByExpr>) {
        let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        match statements.into_iter().next().unwrap() {
            Statement::Query(query) => {
                let order_by = query.order_by;
                match *query.body {
                    SetExpr::Select(select) => (
                        AliasTable::from_projection(&select.projection).unwrap(),
                        order_by,
                    ),
                    _ => panic!("expected a plain select"),
                }
            }
            _ => panic!("expected a query"),
        }
    }

    #[test]
    fn default_direction_is_ascending() {
        let (aliases, order_by) = parts("SELECT city FROM t ORDER BY city");

        assert_eq!(
            build_sort_stage(&order_by, &aliases).unwrap().to_document(),
            doc! { "$sort": { "city": 1 } }
        );
    }

    #[test]
    fn unlisted_aggregates_sort_by_their_default_alias() {
        let (aliases, order_by) = parts("SELECT city FROM t ORDER BY count(*) DESC");

        assert_eq!(
            build_sort_stage(&order_by, &aliases).unwrap().to_document(),
            doc! { "$sort": { "count(*)": -1 } }
        );
    }
}
