//! Positional-parameter interpolation into the query text.
//!
//! Each `?` placeholder outside a quoted region (string literal or quoted
//! identifier) is replaced left-to-right with the rendered bound value
//! before the text reaches the parser. Surplus values are ignored; a
//! placeholder without a value is an error.

use bson::Bson;

use crate::CompileError;

pub(crate) fn interpolate(sql: &str, params: &[Bson]) -> Result<String, CompileError> {
    let mut out = String::with_capacity(sql.len());
    let mut values = params.iter();
    // The opening quote of the region the scanner is inside, if any.
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match ch {
            '\'' | '"' => {
                match quote {
                    None => quote = Some(ch),
                    Some(open) if open == ch => quote = None,
                    Some(_) => {}
                }
                out.push(ch);
            }
            '?' if quote.is_none() => {
                let value = values.next().ok_or_else(|| {
                    CompileError::UnsupportedShape(
                        "placeholder without a bound parameter value".to_string(),
                    )
                })?;
                render(value, &mut out)?;
            }
            _ => out.push(ch),
        }
    }

    Ok(out)
}

fn render(value: &Bson, out: &mut String) -> Result<(), CompileError> {
    match value {
        Bson::String(text) => {
            out.push('\'');
            out.push_str(&text.replace('\'', "''"));
            out.push('\'');
        }
        Bson::Int32(n) => out.push_str(&n.to_string()),
        Bson::Int64(n) => out.push_str(&n.to_string()),
        Bson::Double(f) => out.push_str(&f.to_string()),
        Bson::Boolean(flag) => out.push_str(if *flag { "TRUE" } else { "FALSE" }),
        Bson::Null => out.push_str("NULL"),
        other => {
            return Err(CompileError::UnsupportedShape(format!(
                "parameter type {:?} cannot be bound into query text",
                other.element_type()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_placeholders_in_order() {
        let sql = interpolate(
            "SELECT * FROM t WHERE a = ? AND b = ?",
            &[Bson::String("x".to_string()), Bson::Int64(5)],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = 'x' AND b = 5");
    }

    #[test]
    fn escapes_embedded_quotes() {
        let sql = interpolate("WHERE a = ?", &[Bson::String("O'Brien".to_string())]).unwrap();
        assert_eq!(sql, "WHERE a = 'O''Brien'");
    }

    #[test]
    fn leaves_placeholders_inside_string_literals() {
        let sql = interpolate("WHERE a = 'lit?eral' AND b = ?", &[Bson::Boolean(true)]).unwrap();
        assert_eq!(sql, "WHERE a = 'lit?eral' AND b = TRUE");
    }

    #[test]
    fn leaves_placeholders_inside_quoted_identifiers() {
        let sql =
            interpolate("SELECT \"what?\" FROM t WHERE a = ?", &[Bson::Int64(1)]).unwrap();
        assert_eq!(sql, "SELECT \"what?\" FROM t WHERE a = 1");
    }

    #[test]
    fn surplus_values_are_ignored() {
        let sql = interpolate("SELECT 1", &[Bson::Int64(9)]).unwrap();
        assert_eq!(sql, "SELECT 1");
    }

    #[test]
    fn missing_parameters_are_an_error() {
        assert!(matches!(
            interpolate("WHERE a = ?", &[]),
            Err(CompileError::UnsupportedShape(_))
        ));
    }
}
