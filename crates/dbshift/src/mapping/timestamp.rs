//! Timestamp parsing for values headed into date/time columns.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;

use crate::core::Value;

/// Epoch values above this are read as milliseconds (year 5138 in seconds).
const MILLIS_THRESHOLD: f64 = 1e11;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%Y%m%d"];

/// Interpret a value as a UTC timestamp.
///
/// Numbers are Unix epoch seconds, or milliseconds when large enough.
/// Strings may be epoch numbers, RFC 3339, or one of the common layouts above.
/// Returns `None` when the value cannot be read as a point in time.
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::Int(v) => from_epoch(*v as f64),
        Value::Float(f) => from_epoch(*f),
        Value::Decimal(d) => d.to_f64().and_then(from_epoch),
        Value::Text(s) => parse_str(s.trim()),
        _ => None,
    }
}

fn parse_str(s: &str) -> Option<NaiveDateTime> {
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<f64>() {
        // Compact dates such as 20240131 also parse as numbers.
        if s.len() == 8 && !s.contains('.') {
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
                return d.and_hms_opt(0, 0, 0);
            }
        }
        return from_epoch(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn from_epoch(n: f64) -> Option<NaiveDateTime> {
    if !n.is_finite() {
        return None;
    }
    let millis = if n.abs() >= MILLIS_THRESHOLD {
        n
    } else {
        n * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64).map(|dt| dt.naive_utc())
}
