//! Conversions between tiberius column data and [`Value`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tiberius::{ColumnData, FromSql, Query};

use crate::core::{Row, Value};
use crate::error::{MigrateError, Result};

/// Read a result row into named values.
pub(super) fn read_row(row: tiberius::Row) -> Result<Row> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut out = Row::with_capacity(names.len());
    for (name, data) in names.into_iter().zip(row) {
        out.insert(name, column_value(&data)?);
    }
    Ok(out)
}

/// Read a result row positionally.
pub(super) fn read_values(row: tiberius::Row) -> Result<Vec<Value>> {
    row.into_iter().map(|data| column_value(&data)).collect()
}

pub(super) fn column_value(data: &ColumnData<'static>) -> Result<Value> {
    let value = match data {
        ColumnData::U8(v) => Value::from(v.map(i64::from)),
        ColumnData::I16(v) => Value::from(v.map(i64::from)),
        ColumnData::I32(v) => Value::from(v.map(i64::from)),
        ColumnData::I64(v) => Value::from(*v),
        ColumnData::F32(v) => Value::from(v.map(f64::from)),
        ColumnData::F64(v) => Value::from(*v),
        ColumnData::Bit(v) => Value::from(*v),
        ColumnData::String(v) => Value::from(v.as_ref().map(|s| s.to_string())),
        ColumnData::Guid(v) => Value::from(*v),
        ColumnData::Binary(v) => Value::from(v.as_ref().map(|b| b.to_vec())),
        ColumnData::Xml(v) => Value::from(v.as_ref().map(|x| x.clone().into_owned().into_string())),
        ColumnData::Numeric(_) => Value::from(convert::<Decimal>(data)?),
        ColumnData::Date(_) => Value::from(convert::<NaiveDate>(data)?),
        ColumnData::Time(_) => Value::from(convert::<NaiveTime>(data)?.map(|t| t.to_string())),
        ColumnData::DateTimeOffset(_) => {
            Value::from(convert::<DateTime<Utc>>(data)?.map(|dt| dt.naive_utc()))
        }
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            Value::from(convert::<NaiveDateTime>(data)?)
        }
    };
    Ok(value)
}

fn convert<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>) -> Result<Option<T>> {
    T::from_sql(data).map_err(|e| MigrateError::Statement(format!("reading column value: {}", e)))
}

/// Bind a value as the next `@Pn` parameter.
pub(super) fn bind(query: &mut Query<'_>, value: &Value) {
    match value {
        Value::Null => query.bind(Option::<&str>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(n) => query.bind(*n),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(d) => match tiberius::ToSql::to_sql(d) {
            ColumnData::Numeric(n) => query.bind(n),
            _ => unreachable!("tiberius encodes Decimal as Numeric"),
        },
        Value::Text(s) => query.bind(s.clone()),
        Value::Timestamp(ts) => query.bind(*ts),
        Value::Date(d) => query.bind(*d),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Uuid(u) => query.bind(*u),
    }
}

/// Server errors are statement-level; everything else means the connection is gone.
pub(super) fn classify(e: tiberius::error::Error) -> MigrateError {
    use tiberius::error::Error;
    match e {
        Error::Server(_)
        | Error::Conversion(_)
        | Error::Encoding(_)
        | Error::Utf8
        | Error::Utf16
        | Error::ParseInt(_)
        | Error::BulkInput(_) => MigrateError::Statement(e.to_string()),
        other => MigrateError::connection("mssql", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_column_values() {
        assert_eq!(column_value(&ColumnData::I32(Some(7))).unwrap(), Value::Int(7));
        assert_eq!(column_value(&ColumnData::Bit(None)).unwrap(), Value::Null);
        assert_eq!(
            column_value(&ColumnData::String(Some(Cow::Borrowed("abc")))).unwrap(),
            Value::from("abc")
        );
        assert_eq!(
            column_value(&ColumnData::F32(Some(1.5))).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn test_classify_io_as_connectivity() {
        let err = classify(tiberius::error::Error::Io {
            kind: std::io::ErrorKind::ConnectionReset,
            message: "reset".into(),
        });
        assert!(err.is_connectivity());
        let err = classify(tiberius::error::Error::Conversion("bad".into()));
        assert!(err.is_row_local());
        assert!(classify(tiberius::error::Error::Utf16).is_row_local());
    }
}
