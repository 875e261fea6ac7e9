mod decimal;

pub use decimal::{Decimal, ParseDecimalError};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt;

/// Datetime rendering used for display text and the wire format
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A typed field value
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Number(Decimal),
    String(String),
    DateTime(NaiveDateTime),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null and the empty string both count as "no value"
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Equality used for change detection: null and empty string are equal.
    pub fn same_as(&self, other: &Value) -> bool {
        self == other || (self.is_blank() && other.is_blank())
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Number(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Lift a wire value. Arrays and objects are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match Decimal::parse(&n.to_string()) {
                Some(d) => Value::Number(d),
                None => n
                    .as_f64()
                    .and_then(Decimal::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(n.to_string())),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Number(d) => {
                if d.scale() == 0 {
                    if let Some(i) = d.trunc_i64() {
                        return serde_json::Value::from(i);
                    }
                }
                serde_json::Number::from_f64(d.to_f64())
                    .map(serde_json::Value::Number)
                    .unwrap_or_else(|| serde_json::Value::String(d.to_string()))
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format(DATETIME_FORMAT).to_string())
            }
            Value::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(d) => write!(f, "{d}"),
            Value::String(s) => f.write_str(s),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(Decimal::from_i64(i))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Number(Decimal::from_i64(i as i64))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Decimal::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Number(d)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Boolean tokens: `t`, `T`, `true`, `TRUE`, `1`. Everything else is false.
pub fn parse_bool_token(text: &str) -> bool {
    matches!(text.trim(), "t" | "T" | "true" | "TRUE" | "1")
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn datetime_from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}
