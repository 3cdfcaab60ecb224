//! WHERE/HAVING translation into document predicates.

use bson::{doc, Bson, Document};
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value};

use crate::columns::{column_name, AggregateCall, AliasTable};
use crate::CompileError;

/// Which namespace a predicate's column references address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldScope {
    /// Before the group stage: raw document fields (WHERE).
    RawColumns,
    /// After the group stage: only group-output aliases are addressable
    /// (HAVING).
    GroupOutputs,
}

/// Recursively convert a boolean expression tree into a match predicate.
pub(crate) fn translate(
    expr: &Expr,
    scope: FieldScope,
    aliases: &AliasTable,
) -> Result<Document, CompileError> {
    match expr {
        Expr::Nested(inner) => translate(inner, scope, aliases),

        Expr::BinaryOp {
            op: BinaryOperator::And,
            left,
            right,
        } => Ok(doc! {
            "$and": [translate(left, scope, aliases)?, translate(right, scope, aliases)?]
        }),
        Expr::BinaryOp {
            op: BinaryOperator::Or,
            left,
            right,
        } => Ok(doc! {
            "$or": [translate(left, scope, aliases)?, translate(right, scope, aliases)?]
        }),
        Expr::BinaryOp { op, left, right } => {
            let operator = comparison_op(op)?;
            let (field, numeric) = resolve_field(left, scope, aliases)?;
            let value = coerced_literal(right, numeric)?;
            Ok(doc! { field: { operator: value } })
        }

        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let (field, numeric) = resolve_field(expr, scope, aliases)?;
            let values = list
                .iter()
                .map(|item| coerced_literal(item, numeric))
                .collect::<Result<Vec<_>, _>>()?;
            let operator = if *negated { "$nin" } else { "$in" };
            Ok(doc! { field: { operator: values } })
        }

        Expr::Like {
            negated: false,
            expr,
            pattern,
            ..
        } => {
            let (field, _) = resolve_field(expr, scope, aliases)?;
            let pattern = match literal(pattern)? {
                Bson::String(text) => text,
                other => {
                    return Err(CompileError::UnsupportedShape(format!(
                        "LIKE pattern must be a string literal, got {other}"
                    )))
                }
            };
            // The pattern literal is carried verbatim; no `%` rewriting.
            Ok(doc! { field: { "$regex": Bson::RegularExpression(bson::Regex {
                pattern,
                options: String::new(),
            }) } })
        }
        Expr::Like { negated: true, .. } => Err(CompileError::UnsupportedShape(
            "NOT LIKE is not supported".to_string(),
        )),

        // `is` / `is not` against the SQL constants.
        Expr::IsNull(inner) => constant_check(inner, scope, aliases, "$eq", Bson::Null),
        Expr::IsNotNull(inner) => constant_check(inner, scope, aliases, "$ne", Bson::Null),
        Expr::IsTrue(inner) => constant_check(inner, scope, aliases, "$eq", Bson::Boolean(true)),
        Expr::IsNotTrue(inner) => constant_check(inner, scope, aliases, "$ne", Bson::Boolean(true)),
        Expr::IsFalse(inner) => constant_check(inner, scope, aliases, "$eq", Bson::Boolean(false)),
        Expr::IsNotFalse(inner) => {
            constant_check(inner, scope, aliases, "$ne", Bson::Boolean(false))
        }

        other => Err(CompileError::UnsupportedShape(format!(
            "unsupported predicate: {other}"
        ))),
    }
}

fn constant_check(
    expr: &Expr,
    scope: FieldScope,
    aliases: &AliasTable,
    operator: &str,
    value: Bson,
) -> Result<Document, CompileError> {
    let (field, _) = resolve_field(expr, scope, aliases)?;
    Ok(doc! { field: { operator: value } })
}

fn comparison_op(op: &BinaryOperator) -> Result<&'static str, CompileError> {
    match op {
        BinaryOperator::Eq => Ok("$eq"),
        BinaryOperator::NotEq => Ok("$ne"),
        BinaryOperator::Gt => Ok("$gt"),
        BinaryOperator::GtEq => Ok("$gte"),
        BinaryOperator::Lt => Ok("$lt"),
        BinaryOperator::LtEq => Ok("$lte"),
        other => Err(CompileError::UnsupportedShape(format!(
            "operator `{other}` has no document equivalent"
        ))),
    }
}

/// Resolve the left operand of a predicate to an output field name, and
/// report whether right-hand literals must be coerced to numbers.
///
/// Pre-group, the raw column name is used unmodified and values pass
/// through as parsed. Post-group, the operand must be an aggregate present
/// in the select list; the field becomes that aggregate's alias and the
/// comparison is numeric.
fn resolve_field(
    expr: &Expr,
    scope: FieldScope,
    aliases: &AliasTable,
) -> Result<(String, bool), CompileError> {
    match scope {
        FieldScope::RawColumns => Ok((column_name(expr)?, false)),
        FieldScope::GroupOutputs => match expr {
            Expr::Function(func) => {
                let call = AggregateCall::from_function(func)?;
                let column = aliases
                    .aggregate_alias(&call)
                    .ok_or_else(|| CompileError::UnresolvedAlias(call.default_alias()))?;
                Ok((column.alias.clone(), true))
            }
            other => Err(CompileError::UnresolvedAlias(format!(
                "HAVING must compare a select-list aggregate, got `{other}`"
            ))),
        },
    }
}

fn coerced_literal(expr: &Expr, numeric: bool) -> Result<Bson, CompileError> {
    let value = literal(expr)?;
    if numeric {
        coerce_numeric(value)
    } else {
        Ok(value)
    }
}

/// Extract a literal value, folding unary minus into the number.
pub(crate) fn literal(expr: &Expr) -> Result<Bson, CompileError> {
    match expr {
        Expr::Value(value) => literal_value(value),
        Expr::Nested(inner) => literal(inner),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Bson::Int64(n) => Ok(Bson::Int64(-n)),
            Bson::Double(f) => Ok(Bson::Double(-f)),
            other => Err(CompileError::UnsupportedShape(format!(
                "cannot negate literal {other}"
            ))),
        },
        other => Err(CompileError::UnsupportedShape(format!(
            "expected a literal value, got `{other}`"
        ))),
    }
}

fn literal_value(value: &Value) -> Result<Bson, CompileError> {
    match value {
        Value::Number(text, _) => parse_number(text),
        Value::SingleQuotedString(text) | Value::DoubleQuotedString(text) => {
            Ok(Bson::String(text.clone()))
        }
        Value::Boolean(flag) => Ok(Bson::Boolean(*flag)),
        Value::Null => Ok(Bson::Null),
        other => Err(CompileError::UnsupportedShape(format!(
            "unsupported literal: {other}"
        ))),
    }
}

fn parse_number(text: &str) -> Result<Bson, CompileError> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Bson::Int64(n));
    }
    text.parse::<f64>().map(Bson::Double).map_err(|_| {
        CompileError::UnsupportedShape(format!("invalid numeric literal `{text}`"))
    })
}

fn coerce_numeric(value: Bson) -> Result<Bson, CompileError> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Ok(value),
        Bson::String(text) => parse_number(&text),
        other => Err(CompileError::UnsupportedShape(format!(
            "cannot coerce {other} to a number"
        ))),
    }
}
