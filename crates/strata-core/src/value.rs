//! Semantic values and the row/object shapes exchanged with drivers.
//!
//! A [`Value`] is the in-memory form a caller reads and writes: dates are
//! `chrono` values, lists are string vectors, JSON is a parsed tree. The
//! storage form a driver actually sends over the wire is produced from it
//! by the [`Caster`](crate::caster::Caster) and the dialect escaping rules.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;

/// A semantic scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL / absent.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Unsigned integer value.
    UInt(u64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Wall-clock time.
    Time(NaiveTime),
    /// Date and time, no timezone.
    DateTime(NaiveDateTime),
    /// List of strings, stored comma-joined.
    List(Vec<String>),
    /// Arbitrary JSON tree, stored serialized.
    Json(serde_json::Value),
}

/// An ordered field-name → value mapping as seen by callers.
pub type Object = IndexMap<String, Value>;

/// An ordered column-name → storage-value mapping as seen by drivers.
///
/// Same shape as [`Object`]; the distinction is which side of the
/// [`Caster`](crate::caster::Caster) the map lives on.
pub type Row = IndexMap<String, Value>;

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as `f64` if it is numeric in any representation.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::UInt(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    /// Returns the value as `i64` if it is integral.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::UInt(n) => i64::try_from(*n).ok(),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Returns the text content for string-like values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// SQL truthiness: NULL, `false`, `0`, and the empty string are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::UInt(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::Text(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Equality up to numeric representation: `Int(2)`, `UInt(2)` and
    /// `Float(2.0)` compare equal. Used by the upsert key matcher.
    #[must_use]
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(String::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
