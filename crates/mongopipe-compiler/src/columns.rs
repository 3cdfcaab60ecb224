//! Select-list normalization and the per-compilation alias table.
//!
//! The alias table is built once per `compile` call and borrowed by the
//! grouping, ordering and HAVING steps; it never outlives the call.

use bson::{doc, Document};
use sqlparser::ast::{Expr, Function, FunctionArg, FunctionArgExpr, ObjectName, SelectItem};

use crate::CompileError;

/// Aggregate functions the pipeline can reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggregateFunc {
    Count,
    Sum,
    Avg,
}

impl AggregateFunc {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFunc::Count),
            "sum" => Some(AggregateFunc::Sum),
            "avg" => Some(AggregateFunc::Avg),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
        }
    }
}

/// Argument of an aggregate call: `*` or a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AggregateArg {
    Star,
    Field(String),
}

impl AggregateArg {
    fn render(&self) -> &str {
        match self {
            AggregateArg::Star => "*",
            AggregateArg::Field(name) => name,
        }
    }
}

/// An aggregate call as it appears in the select list or in HAVING.
/// Equality (function + argument) is what HAVING resolution matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AggregateCall {
    pub func: AggregateFunc,
    pub arg: AggregateArg,
}

impl AggregateCall {
    /// Recognize a function expression as a supported aggregate.
    pub fn from_function(func: &Function) -> Result<Self, CompileError> {
        let name = object_name_tail(&func.name);
        let kind = AggregateFunc::from_name(&name).ok_or_else(|| {
            CompileError::UnsupportedShape(format!(
                "aggregate function `{name}` is not supported"
            ))
        })?;

        let arg = match func.args.as_slice() {
            [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => AggregateArg::Star,
            [FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))] => {
                AggregateArg::Field(column_name(expr)?)
            }
            _ => {
                return Err(CompileError::UnsupportedShape(format!(
                    "aggregate `{name}` must take a single column or `*` argument"
                )))
            }
        };

        if kind != AggregateFunc::Count && arg == AggregateArg::Star {
            return Err(CompileError::UnsupportedShape(format!(
                "{}(*) is not supported",
                kind.name()
            )));
        }

        Ok(AggregateCall { func: kind, arg })
    }

    /// Default output alias when the select list gives none: `func(arg)`.
    pub fn default_alias(&self) -> String {
        format!("{}({})", self.func.name(), self.arg.render())
    }

    /// Accumulator document for the group stage.
    pub fn accumulator(&self) -> Document {
        match (self.func, &self.arg) {
            (AggregateFunc::Count, _) => doc! { "$sum": 1 },
            (AggregateFunc::Sum, AggregateArg::Field(field)) => {
                doc! { "$sum": format!("${field}") }
            }
            (AggregateFunc::Avg, AggregateArg::Field(field)) => {
                doc! { "$avg": format!("${field}") }
            }
            // Rejected in from_function.
            (AggregateFunc::Sum | AggregateFunc::Avg, AggregateArg::Star) => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ColumnKind {
    /// Plain column reference; `source` is the raw document field.
    Dimension { source: String },
    Aggregate { call: AggregateCall },
}

/// One normalized select-list column.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SelectColumn {
    pub alias: String,
    pub kind: ColumnKind,
}

/// Output-alias table for one compilation, in select-list order.
#[derive(Debug)]
pub(crate) struct AliasTable {
    columns: Vec<SelectColumn>,
}

impl AliasTable {
    pub fn from_projection(projection: &[SelectItem]) -> Result<Self, CompileError> {
        let mut columns = Vec::with_capacity(projection.len());
        for item in projection {
            let (expr, alias) = match item {
                SelectItem::UnnamedExpr(expr) => (expr, None),
                SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    return Err(CompileError::UnsupportedShape(
                        "wildcard projections are not supported".to_string(),
                    ))
                }
            };
            columns.push(normalize_column(expr, alias)?);
        }
        Ok(AliasTable { columns })
    }

    /// Resolve a 1-based ordinal reference into the select list.
    pub fn by_ordinal(&self, position: u64) -> Result<&SelectColumn, CompileError> {
        position
            .checked_sub(1)
            .and_then(|index| self.columns.get(index as usize))
            .ok_or(CompileError::UnresolvedOrdinal {
                position,
                columns: self.columns.len(),
            })
    }

    /// First select column whose aggregate call matches by function and
    /// argument.
    pub fn aggregate_alias(&self, call: &AggregateCall) -> Option<&SelectColumn> {
        self.columns
            .iter()
            .find(|column| matches!(&column.kind, ColumnKind::Aggregate { call: c } if c == call))
    }

    /// Aggregate columns in select-list order.
    pub fn aggregates(&self) -> impl Iterator<Item = (&str, &AggregateCall)> {
        self.columns.iter().filter_map(|column| match &column.kind {
            ColumnKind::Aggregate { call } => Some((column.alias.as_str(), call)),
            ColumnKind::Dimension { .. } => None,
        })
    }
}

fn normalize_column(expr: &Expr, alias: Option<String>) -> Result<SelectColumn, CompileError> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            let source = column_name(expr)?;
            Ok(SelectColumn {
                alias: alias.unwrap_or_else(|| source.clone()),
                kind: ColumnKind::Dimension { source },
            })
        }
        Expr::Function(func) => {
            let call = AggregateCall::from_function(func)?;
            Ok(SelectColumn {
                alias: alias.unwrap_or_else(|| call.default_alias()),
                kind: ColumnKind::Aggregate { call },
            })
        }
        other => Err(CompileError::UnsupportedShape(format!(
            "unsupported select expression: {other}"
        ))),
    }
}

/// Bare field name of a column reference; table-qualified references
/// resolve to their final segment.
pub(crate) fn column_name(expr: &Expr) -> Result<String, CompileError> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| CompileError::UnsupportedShape("empty column reference".to_string())),
        other => Err(CompileError::UnsupportedShape(format!(
            "expected a column reference, got `{other}`"
        ))),
    }
}

pub(crate) fn object_name_tail(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default()
}

/// Parse the text of a numeric GROUP BY/ORDER BY item as a 1-based ordinal.
pub(crate) fn ordinal(text: &str) -> Result<u64, CompileError> {
    text.parse::<u64>().map_err(|_| {
        CompileError::UnsupportedShape(format!("invalid ordinal reference `{text}`"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::{SetExpr, Statement};
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn projection(sql: &str) -> Vec<SelectItem> {
        let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        match statements.into_iter().next().unwrap() {
            Statement::Query(query) => match *query.body {
                SetExpr::Select(select) => select.projection,
                _ => panic!("expected a plain select"),
            },
            _ => panic!("expected a query"),
        }
    }

    #[test]
    fn aggregates_get_default_aliases() {
        let table =
            AliasTable::from_projection(&projection("SELECT count(*), sum(zip) FROM t")).unwrap();
        let aliases: Vec<_> = table.aggregates().map(|(alias, _)| alias).collect();
        assert_eq!(aliases, vec!["count(*)", "sum(zip)"]);
    }

    #[test]
    fn explicit_aliases_win_over_defaults() {
        let table =
            AliasTable::from_projection(&projection("SELECT count(*) AS cnt FROM t")).unwrap();
        assert_eq!(table.by_ordinal(1).unwrap().alias, "cnt");
    }

    #[test]
    fn ordinals_are_one_based() {
        let table =
            AliasTable::from_projection(&projection("SELECT city AS c, count(*) FROM t")).unwrap();

        assert_eq!(table.by_ordinal(1).unwrap().alias, "c");
        assert_eq!(table.by_ordinal(2).unwrap().alias, "count(*)");
        assert!(matches!(
            table.by_ordinal(0),
            Err(CompileError::UnresolvedOrdinal { .. })
        ));
        assert!(matches!(
            table.by_ordinal(3),
            Err(CompileError::UnresolvedOrdinal {
                position: 3,
                columns: 2
            })
        ));
    }

    #[test]
    fn wildcards_are_rejected() {
        assert!(matches!(
            AliasTable::from_projection(&projection("SELECT * FROM t")),
            Err(CompileError::UnsupportedShape(_))
        ));
    }

    #[test]
    fn sum_requires_a_column_argument() {
        assert!(matches!(
            AliasTable::from_projection(&projection("SELECT sum(*) FROM t")),
            Err(CompileError::UnsupportedShape(_))
        ));
    }
}
