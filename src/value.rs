//! Typed values decoded from query results.

use chrono::{DateTime, FixedOffset};
use ordered_float::OrderedFloat;

use crate::point::FieldValue;

/// A cell of a query result.
///
/// The variant is chosen by the column's `#datatype` annotation, never by
/// looking at the text of the cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Double(OrderedFloat<f64>),
    Bool(bool),
    Long(i64),
    UnsignedLong(u64),
    Duration(chrono::Duration),
    /// Already base64-decoded.
    Base64Binary(Vec<u8>),
    TimeRFC(DateTime<FixedOffset>),
    /// Empty cell of a non-string column.
    Null,
}

impl Value {
    /// The text of a `String` cell.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// A `Double` cell. Integral cells are not widened; see [`as_f64`](Self::as_f64).
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(f.into_inner()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value widened to f64 (`Double`, `Long` or `UnsignedLong`).
    ///
    /// Aggregates such as `mean()` turn integer fields into doubles while
    /// `max()` keeps them integral; this reads either.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(f.into_inner()),
            Value::Long(i) => Some(*i as f64),
            Value::UnsignedLong(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// A `dateTime:RFC3339` cell.
    pub fn as_time(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Value::TimeRFC(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&FieldValue> for Value {
    fn from(v: &FieldValue) -> Self {
        match v {
            FieldValue::Integer(i) => Value::Long(*i),
            FieldValue::Float(f) => Value::Double(OrderedFloat(*f)),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::String(s) => Value::String(s.clone()),
        }
    }
}

/// A written field reads back as the same scalar.
impl PartialEq<FieldValue> for Value {
    fn eq(&self, other: &FieldValue) -> bool {
        *self == Value::from(other)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Double(d) => write!(f, "{}", d),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Long(i) => write!(f, "{}", i),
            Value::UnsignedLong(u) => write!(f, "{}", u),
            Value::Duration(d) => write!(f, "{}ns", d.num_nanoseconds().unwrap_or(0)),
            Value::Base64Binary(b) => write!(f, "<binary {} bytes>", b.len()),
            Value::TimeRFC(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Null => write!(f, ""),
        }
    }
}
