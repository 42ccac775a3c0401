//! Named value transformations declared in configuration.

use std::fmt;
use std::str::FromStr;

use crate::core::Value;
use crate::error::{MigrateError, Result};

/// A transformation applied to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformation {
    /// Keep at most N characters.
    Truncate(usize),
    Trim,
    Upper,
    Lower,
    /// `1`, `"1"` and `"true"` become true, everything else false.
    ToBool,
    ToString,
    /// Empty or whitespace-only strings become null.
    EmptyToNull,
}

impl Transformation {
    /// Parse a configuration string such as `trim` or `truncate:50`.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse().map_err(MigrateError::Config)
    }

    /// Apply to a value. Nulls are returned unchanged.
    pub fn apply(&self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        match (self, value) {
            (Transformation::Truncate(max), Value::Text(s)) => match s.char_indices().nth(*max) {
                Some((idx, _)) => Value::Text(s[..idx].to_string()),
                None => Value::Text(s),
            },
            (Transformation::Trim, Value::Text(s)) => Value::Text(s.trim().to_string()),
            (Transformation::Upper, Value::Text(s)) => Value::Text(s.to_uppercase()),
            (Transformation::Lower, Value::Text(s)) => Value::Text(s.to_lowercase()),
            (Transformation::ToBool, v) => Value::Bool(coerce_bool(&v)),
            (Transformation::ToString, Value::Text(s)) => Value::Text(s),
            (Transformation::ToString, v) => Value::Text(v.to_string()),
            (Transformation::EmptyToNull, Value::Text(s)) if s.trim().is_empty() => Value::Null,
            (_, v) => v,
        }
    }
}

impl FromStr for Transformation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if let Some(len) = s.strip_prefix("truncate:") {
            return len
                .trim()
                .parse::<usize>()
                .map(Transformation::Truncate)
                .map_err(|_| format!("invalid truncate length '{}'", len));
        }
        match s.as_str() {
            "trim" => Ok(Transformation::Trim),
            "upper" | "uppercase" => Ok(Transformation::Upper),
            "lower" | "lowercase" => Ok(Transformation::Lower),
            "to_bool" | "boolean" => Ok(Transformation::ToBool),
            "to_string" | "string" => Ok(Transformation::ToString),
            "empty_to_null" => Ok(Transformation::EmptyToNull),
            other => Err(format!(
                "unknown transformation '{}' (expected truncate:N, trim, upper, lower, \
                 to_bool, to_string or empty_to_null)",
                other
            )),
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transformation::Truncate(n) => write!(f, "truncate:{}", n),
            Transformation::Trim => write!(f, "trim"),
            Transformation::Upper => write!(f, "upper"),
            Transformation::Lower => write!(f, "lower"),
            Transformation::ToBool => write!(f, "to_bool"),
            Transformation::ToString => write!(f, "to_string"),
            Transformation::EmptyToNull => write!(f, "empty_to_null"),
        }
    }
}

/// Boolean coercion shared by the resolver and the `to_bool` transformation.
pub(crate) fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(v) => *v == 1,
        Value::Float(f) => *f == 1.0,
        Value::Decimal(d) => *d == rust_decimal::Decimal::ONE,
        Value::Text(s) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Transformation::parse("truncate:50").unwrap(), Transformation::Truncate(50));
        assert_eq!(Transformation::parse(" TRIM ").unwrap(), Transformation::Trim);
        assert_eq!(Transformation::parse("uppercase").unwrap(), Transformation::Upper);
        assert!(Transformation::parse("truncate:abc").is_err());
        assert!(Transformation::parse("reverse").is_err());
    }

    #[test]
    fn test_truncate_counts_characters() {
        let t = Transformation::Truncate(3);
        assert_eq!(t.apply(Value::from("héllo")), Value::from("hél"));
        assert_eq!(t.apply(Value::from("ab")), Value::from("ab"));
        assert_eq!(t.apply(Value::Int(12345)), Value::Int(12345));
    }

    #[test]
    fn test_nulls_untouched() {
        assert_eq!(Transformation::ToBool.apply(Value::Null), Value::Null);
        assert_eq!(Transformation::ToString.apply(Value::Null), Value::Null);
    }

    #[test]
    fn test_to_bool() {
        assert_eq!(Transformation::ToBool.apply(Value::Int(1)), Value::Bool(true));
        assert_eq!(Transformation::ToBool.apply(Value::from("TRUE")), Value::Bool(true));
        assert_eq!(Transformation::ToBool.apply(Value::from("yes")), Value::Bool(false));
        assert_eq!(Transformation::ToBool.apply(Value::Int(2)), Value::Bool(false));
    }

    #[test]
    fn test_empty_to_null() {
        assert_eq!(Transformation::EmptyToNull.apply(Value::from("  ")), Value::Null);
        assert_eq!(Transformation::EmptyToNull.apply(Value::from("x")), Value::from("x"));
    }

    #[test]
    fn test_display_round_trips_config_name() {
        assert_eq!(Transformation::Truncate(10).to_string(), "truncate:10");
    }
}
