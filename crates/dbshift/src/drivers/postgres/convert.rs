//! Conversions between tokio-postgres rows/parameters and [`Value`].

use std::error::Error as StdError;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};

use crate::core::{Row, Value};
use crate::error::{MigrateError, Result};

type BoxError = Box<dyn StdError + Sync + Send>;

/// Read a result row into named values, decoding by column type.
pub(super) fn read_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name(), column_value(row, idx, column.type_())?);
    }
    Ok(out)
}

fn column_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value> {
    let value = match *ty {
        Type::BOOL => Value::from(get::<bool>(row, idx)?),
        Type::INT2 => Value::from(get::<i16>(row, idx)?.map(i64::from)),
        Type::INT4 => Value::from(get::<i32>(row, idx)?.map(i64::from)),
        Type::INT8 => Value::from(get::<i64>(row, idx)?),
        Type::OID => Value::from(get::<u32>(row, idx)?.map(i64::from)),
        Type::FLOAT4 => Value::from(get::<f32>(row, idx)?.map(f64::from)),
        Type::FLOAT8 => Value::from(get::<f64>(row, idx)?),
        Type::NUMERIC => Value::from(get::<Decimal>(row, idx)?),
        Type::TIMESTAMP => Value::from(get::<NaiveDateTime>(row, idx)?),
        Type::TIMESTAMPTZ => Value::from(get::<DateTime<Utc>>(row, idx)?.map(|dt| dt.naive_utc())),
        Type::DATE => Value::from(get::<NaiveDate>(row, idx)?),
        Type::TIME => Value::from(get::<NaiveTime>(row, idx)?.map(|t| t.to_string())),
        Type::UUID => Value::from(get::<uuid::Uuid>(row, idx)?),
        Type::BYTEA => Value::from(get::<Vec<u8>>(row, idx)?),
        Type::JSON | Type::JSONB => {
            Value::from(get::<serde_json::Value>(row, idx)?.map(|v| v.to_string()))
        }
        _ => Value::from(get::<String>(row, idx)?),
    };
    Ok(value)
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        MigrateError::Statement(format!(
            "reading column {} ({}): {}",
            row.columns()[idx].name(),
            row.columns()[idx].type_(),
            e
        ))
    })
}

/// Values are encoded by the parameter type the server inferred, so an
/// `Int` bound to an `int2` column is sent as two bytes.
impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(n) => match *ty {
                Type::INT2 => i16::try_from(*n)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*n)?.to_sql(ty, out),
                Type::FLOAT4 => (*n as f32).to_sql(ty, out),
                Type::FLOAT8 => (*n as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*n).to_sql(ty, out),
                Type::BOOL => (*n != 0).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                    n.to_string().to_sql(ty, out)
                }
                _ => n.to_sql(ty, out),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::from_f64(*f)
                    .ok_or_else(|| format!("{} does not fit in numeric", f))?
                    .to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            Value::Decimal(d) => match *ty {
                Type::FLOAT8 => d
                    .to_f64()
                    .ok_or_else(|| format!("{} does not fit in float8", d))?
                    .to_sql(ty, out),
                _ => d.to_sql(ty, out),
            },
            Value::Text(s) => match *ty {
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
                }
                _ => s.as_str().to_sql(ty, out),
            },
            Value::Timestamp(ts) => match *ty {
                Type::TIMESTAMPTZ => ts.and_utc().to_sql(ty, out),
                Type::DATE => ts.date().to_sql(ty, out),
                _ => ts.to_sql(ty, out),
            },
            Value::Date(d) => match *ty {
                Type::TIMESTAMP | Type::TIMESTAMPTZ => d
                    .and_hms_opt(0, 0, 0)
                    .ok_or("invalid date")?
                    .to_sql(ty, out),
                _ => d.to_sql(ty, out),
            },
            Value::Bytes(b) => b.as_slice().to_sql(ty, out),
            Value::Uuid(u) => match *ty {
                Type::UUID => u.to_sql(ty, out),
                _ => u.to_string().to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Lost connections and server shutdowns are connectivity errors; anything
/// the server reports against the statement itself stays row-local.
pub(super) fn classify(e: tokio_postgres::Error) -> MigrateError {
    if e.is_closed() {
        return MigrateError::connection("postgres", e);
    }
    if let Some(db) = e.as_db_error() {
        let code = db.code();
        if code.code().starts_with("08")
            || *code == SqlState::ADMIN_SHUTDOWN
            || *code == SqlState::CRASH_SHUTDOWN
            || *code == SqlState::CANNOT_CONNECT_NOW
        {
            return MigrateError::connection("postgres", db.message());
        }
        let mut message = format!("{} ({})", db.message(), code.code());
        if let Some(detail) = db.detail() {
            message.push_str(": ");
            message.push_str(detail);
        }
        return MigrateError::Statement(message);
    }
    let io = StdError::source(&e).map_or(false, |s| s.is::<std::io::Error>());
    if io {
        MigrateError::connection("postgres", e)
    } else {
        MigrateError::Statement(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &Type) -> Vec<u8> {
        let mut out = BytesMut::new();
        value.to_sql(ty, &mut out).unwrap();
        out.to_vec()
    }

    #[test]
    fn test_integers_follow_parameter_width() {
        assert_eq!(encode(&Value::Int(7), &Type::INT2), vec![0, 7]);
        assert_eq!(encode(&Value::Int(7), &Type::INT4), vec![0, 0, 0, 7]);
        assert_eq!(encode(&Value::Int(7), &Type::INT8).len(), 8);
        assert_eq!(encode(&Value::Int(7), &Type::TEXT), b"7".to_vec());
    }

    #[test]
    fn test_out_of_range_is_an_error() {
        let mut out = BytesMut::new();
        assert!(Value::Int(70_000).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn test_null_and_text() {
        let mut out = BytesMut::new();
        assert!(matches!(
            Value::Null.to_sql(&Type::INT4, &mut out).unwrap(),
            IsNull::Yes
        ));
        assert_eq!(encode(&Value::from("abc"), &Type::VARCHAR), b"abc".to_vec());
    }
}
