//! SQLite SQL emission.
//!
//! # How SQLite differs from the base rules
//!
//! - Temporal values are stored as epoch-millisecond integers; the
//!   matching cast plugins live in [`crate::driver`].
//! - `json_extract` already unquotes scalars, so the unquote wrapper is
//!   the identity.
//! - Element containment compiles to the `json_array_contains` UDF the
//!   driver registers at `start`.
//! - Conditionals use `iif`, concatenation uses `||`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use strata_core::builder::Dialect;
use strata_core::error::Result;
use strata_core::field::{Field, FieldType};

/// Milliseconds since the Unix epoch for a date at midnight.
pub(crate) fn date_millis(date: &NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Milliseconds since midnight.
pub(crate) fn time_millis(time: &NaiveTime) -> i64 {
    time.signed_duration_since(NaiveTime::MIN).num_milliseconds()
}

/// Milliseconds since the Unix epoch.
pub(crate) fn datetime_millis(datetime: &NaiveDateTime) -> i64 {
    datetime.and_utc().timestamp_millis()
}

/// The SQLite dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates the dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn format_date(&self, date: &NaiveDate) -> String {
        date_millis(date).to_string()
    }

    fn format_time(&self, time: &NaiveTime) -> String {
        time_millis(time).to_string()
    }

    fn format_datetime(&self, datetime: &NaiveDateTime) -> String {
        datetime_millis(datetime).to_string()
    }

    fn if_expr(&self, cond: &str, then: &str, otherwise: &str) -> String {
        format!("iif({cond}, {then}, {otherwise})")
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("({})", parts.join(" || "))
    }

    fn empty_insert(&self, table: &str) -> String {
        format!("INSERT INTO {table} DEFAULT VALUES")
    }

    // SQLite's json_extract yields SQL scalars directly.
    fn json_unquote(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn as_json(&self, expr: &str) -> String {
        format!("json({expr})")
    }

    fn json_contains(&self, col: &str, candidate: &str) -> String {
        format!("json_array_contains({col}, {candidate})")
    }

    fn column_type(&self, field: &Field, _auto_inc_primary: bool) -> Result<String> {
        Ok(match field.ty {
            FieldType::Primary | FieldType::Integer | FieldType::Unsigned | FieldType::Boolean => {
                String::from("INTEGER")
            }
            FieldType::Float | FieldType::Double => String::from("REAL"),
            FieldType::Decimal => {
                let precision = field.precision.unwrap_or(10);
                let scale = field.scale.unwrap_or(0);
                format!("DECIMAL({precision}, {scale})")
            }
            FieldType::Char
            | FieldType::String
            | FieldType::Text
            | FieldType::List
            | FieldType::Json => String::from("TEXT"),
            // Epoch milliseconds.
            FieldType::Date | FieldType::Time | FieldType::Timestamp => String::from("INTEGER"),
        })
    }

    fn auto_increment_clause(&self) -> &'static str {
        "AUTOINCREMENT"
    }
}
