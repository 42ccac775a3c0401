//! Coercion of typed values into a column's declared type.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core::Value;
use crate::error::{MigrateError, Result};
use crate::mapping::parse_timestamp;
use crate::typemap::normalize_type_name;

/// Convert `value` so it can be stored in a column of `target_type`.
///
/// Unknown target types pass the value through. Values that cannot be
/// represented fail with [`MigrateError::Statement`], the same way the
/// database would reject them.
pub fn coerce_value(value: Value, target_type: &str) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }
    let base = normalize_type_name(target_type);
    let mismatch = |v: &Value| {
        MigrateError::Statement(format!(
            "invalid input for type {}: '{}'",
            base, v
        ))
    };

    match base.as_str() {
        "boolean" | "bool" | "bit" => match value {
            Value::Bool(_) => Ok(value),
            Value::Int(n) if n == 0 || n == 1 => Ok(Value::Bool(n == 1)),
            Value::Text(ref s) => match s.trim().to_lowercase().as_str() {
                "1" | "true" | "t" => Ok(Value::Bool(true)),
                "0" | "false" | "f" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
        "tinyint" | "smallint" | "int2" | "int" | "integer" | "int4" | "bigint" | "int8"
        | "serial" | "bigserial" => match value {
            Value::Int(_) => Ok(value),
            ref other => other.as_i64().map(Value::Int).ok_or_else(|| mismatch(other)),
        },
        "real" | "float4" | "float" | "float8" | "double precision" => match value {
            Value::Float(_) => Ok(value),
            ref other => other.as_f64().map(Value::Float).ok_or_else(|| mismatch(other)),
        },
        "numeric" | "decimal" | "money" | "smallmoney" => match value {
            Value::Decimal(_) => Ok(value),
            Value::Int(n) => Ok(Value::Decimal(Decimal::from(n))),
            Value::Float(f) => Decimal::from_f64(f)
                .map(Value::Decimal)
                .ok_or_else(|| mismatch(&value)),
            Value::Text(ref s) => s
                .trim()
                .parse::<Decimal>()
                .map(Value::Decimal)
                .map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        "timestamp" | "timestamptz" | "timestamp without time zone"
        | "timestamp with time zone" | "datetime" | "datetime2" | "smalldatetime"
        | "datetimeoffset" => match value {
            Value::Timestamp(_) => Ok(value),
            ref other => parse_timestamp(other)
                .map(Value::Timestamp)
                .ok_or_else(|| mismatch(other)),
        },
        "date" => match value {
            Value::Date(_) => Ok(value),
            ref other => parse_timestamp(other)
                .map(|ts| Value::Date(ts.date()))
                .ok_or_else(|| mismatch(other)),
        },
        "uuid" | "uniqueidentifier" => match value {
            Value::Uuid(_) => Ok(value),
            Value::Text(ref s) => Uuid::parse_str(s.trim())
                .map(Value::Uuid)
                .map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        "bytea" | "binary" | "varbinary" | "image" => match value {
            Value::Bytes(_) => Ok(value),
            Value::Text(s) => Ok(Value::Bytes(s.into_bytes())),
            _ => Err(mismatch(&value)),
        },
        "text" | "ntext" | "varchar" | "nvarchar" | "char" | "nchar" | "bpchar"
        | "character" | "character varying" | "xml" | "name" | "citext" => match value {
            Value::Text(_) => Ok(value),
            other => Ok(Value::Text(other.to_string())),
        },
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_targets() {
        assert_eq!(coerce_value(Value::from("42"), "int4").unwrap(), Value::Int(42));
        assert_eq!(coerce_value(Value::Float(3.0), "bigint").unwrap(), Value::Int(3));
        let err = coerce_value(Value::from("abc"), "integer").unwrap_err();
        assert!(err.is_row_local());
    }

    #[test]
    fn test_boolean_targets() {
        assert_eq!(coerce_value(Value::Int(1), "boolean").unwrap(), Value::Bool(true));
        assert_eq!(coerce_value(Value::from("f"), "bool").unwrap(), Value::Bool(false));
        assert!(coerce_value(Value::Int(7), "boolean").is_err());
    }

    #[test]
    fn test_text_targets_render_values() {
        assert_eq!(
            coerce_value(Value::Int(5), "varchar(10)").unwrap(),
            Value::from("5")
        );
    }

    #[test]
    fn test_decimal_and_uuid() {
        assert_eq!(
            coerce_value(Value::from("12.50"), "numeric(10,2)").unwrap(),
            Value::Decimal(Decimal::new(1250, 2))
        );
        let id = Uuid::new_v4();
        assert_eq!(
            coerce_value(Value::from(id.to_string()), "uuid").unwrap(),
            Value::Uuid(id)
        );
    }

    #[test]
    fn test_null_and_unknown_pass_through() {
        assert_eq!(coerce_value(Value::Null, "integer").unwrap(), Value::Null);
        assert_eq!(
            coerce_value(Value::from("POINT(1 2)"), "geometry").unwrap(),
            Value::from("POINT(1 2)")
        );
    }
}
