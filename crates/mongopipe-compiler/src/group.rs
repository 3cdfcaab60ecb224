//! Group and projection stage construction.

use bson::{doc, Bson, Document};
use sqlparser::ast::{Expr, GroupByExpr, Value};

use crate::columns::{column_name, ordinal, AliasTable, ColumnKind};
use crate::CompileError;
use mongopipe_plan::Stage;

/// Build the always-present group stage and the projection that strips the
/// internal grouping-identity field.
///
/// Without GROUP BY the group identity is the constant `1` (one global
/// group over the whole input); otherwise it maps each dimension alias to
/// its source field. Dimensions keep their first value per group;
/// aggregates get one accumulator each.
pub(crate) fn build_group_stages(
    group_by: &GroupByExpr,
    aliases: &AliasTable,
) -> Result<(Stage, Stage), CompileError> {
    let dimensions = resolve_dimensions(group_by, aliases)?;

    let id = if dimensions.is_empty() {
        Bson::Int32(1)
    } else {
        let mut id = Document::new();
        for (alias, source) in &dimensions {
            id.insert(alias.clone(), format!("${source}"));
        }
        Bson::Document(id)
    };

    let mut fields = Document::new();
    for (alias, source) in &dimensions {
        // Rows in a group share the dimension value, so first-wins is safe.
        fields.insert(alias.clone(), doc! { "$first": format!("${source}") });
    }
    for (alias, call) in aliases.aggregates() {
        fields.insert(alias, call.accumulator());
    }

    let group = Stage::Group { id, fields };
    // Only `_id` is stripped; accumulator and dimension fields pass through
    // verbatim, even beyond the original SELECT list.
    let project = Stage::Project {
        exclusions: vec!["_id".to_string()],
    };

    Ok((group, project))
}

/// Resolve GROUP BY items to `(output alias, source field)` pairs.
fn resolve_dimensions(
    group_by: &GroupByExpr,
    aliases: &AliasTable,
) -> Result<Vec<(String, String)>, CompileError> {
    let exprs = match group_by {
        GroupByExpr::Expressions(exprs) => exprs,
        GroupByExpr::All => {
            return Err(CompileError::UnsupportedShape(
                "GROUP BY ALL is not supported".to_string(),
            ))
        }
    };

    let mut dimensions = Vec::with_capacity(exprs.len());
    for expr in exprs {
        match expr {
            Expr::Value(Value::Number(text, _)) => {
                let position = ordinal(text)?;
                let column = aliases.by_ordinal(position)?;
                match &column.kind {
                    ColumnKind::Dimension { source } => {
                        dimensions.push((column.alias.clone(), source.clone()));
                    }
                    ColumnKind::Aggregate { .. } => {
                        return Err(CompileError::UnsupportedShape(format!(
                            "GROUP BY ordinal {position} refers to an aggregate expression"
                        )))
                    }
                }
            }
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                let name = column_name(expr)?;
                dimensions.push((name.clone(), name));
            }
            other => {
                return Err(CompileError::UnsupportedShape(format!(
                    "unsupported GROUP BY item: {other}"
                )))
            }
        }
    }

    Ok(dimensions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::{SetExpr, Statement};
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn parts(sql: &str) -> (AliasTable, GroupByExpr) {
        let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        match statements.into_iter().next().unwrap() {
            Statement::Query(query) => match *query.body {
                SetExpr::Select(select) => (
                    AliasTable::from_projection(&select.projection).unwrap(),
                    select.group_by,
                ),
                _ => panic!("expected a plain select"),
            },
            _ => panic!("expected a query"),
        }
    }

    #[test]
    fn missing_group_by_collapses_to_one_group() {
        let (aliases, group_by) = parts("SELECT count(*) FROM t");
        let (group, project) = build_group_stages(&group_by, &aliases).unwrap();

        assert_eq!(
            group.to_document(),
            doc! { "$group": { "_id": 1, "count(*)": { "$sum": 1 } } }
        );
        assert_eq!(project.to_document(), doc! { "$project": { "_id": 0 } });
    }

    #[test]
    fn ordinal_onto_an_aggregate_is_rejected() {
        let (aliases, group_by) = parts("SELECT count(*) FROM t GROUP BY 1");

        assert!(matches!(
            build_group_stages(&group_by, &aliases),
            Err(CompileError::UnsupportedShape(_))
        ));
    }
}
