//! Dialect-specific SQL emission.
//!
//! The [`Builder`](super::Builder) is dialect-neutral; everything a
//! backend disagrees about (escaping, conditionals, JSON access,
//! aggregation wrapping, element containment, column types) goes through
//! this trait. Driver crates provide the concrete implementations.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Result, StrataError};
use crate::eval::AggrOp;
use crate::field::{Field, FieldType};
use crate::value::Value;

/// Applies an aggregation operator to a value expression.
///
/// `Count` is a distinct non-null count; `Sum` coalesces the empty-set
/// NULL to 0.
#[must_use]
pub fn aggregate_sql(op: AggrOp, value: &str) -> String {
    match op {
        AggrOp::Sum => format!("ifnull(sum({value}), 0)"),
        AggrOp::Avg => format!("avg({value})"),
        AggrOp::Min => format!("min({value})"),
        AggrOp::Max => format!("max({value})"),
        AggrOp::Count => format!("count(distinct {value})"),
    }
}

/// Per-backend SQL emission rules.
///
/// Every literal or identifier that reaches a SQL string is produced by
/// [`Dialect::escape_value`] or [`Dialect::escape_id`]; no other layer
/// may embed untrusted text.
pub trait Dialect: Send + Sync {
    /// Dialect name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Quotes an identifier; qualified `a.b` names quote each part.
    fn escape_id(&self, name: &str) -> String {
        name.split('.')
            .map(|part| format!("`{part}`"))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Escapes the content of a string literal (without the quotes).
    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    /// Emits a date literal.
    fn format_date(&self, date: &NaiveDate) -> String {
        format!("'{}'", date.format("%Y-%m-%d"))
    }

    /// Emits a time literal.
    fn format_time(&self, time: &NaiveTime) -> String {
        format!("'{}'", time.format("%H:%M:%S"))
    }

    /// Emits a datetime literal.
    fn format_datetime(&self, datetime: &NaiveDateTime) -> String {
        format!("'{}'", datetime.format("%Y-%m-%d %H:%M:%S"))
    }

    /// Emits a value as a SQL literal.
    fn escape_value(&self, value: &Value, _meta: Option<&Field>) -> String {
        match value {
            Value::Null => String::from("NULL"),
            Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
            Value::Int(n) => n.to_string(),
            Value::UInt(n) => n.to_string(),
            // JSON-safe repr: non-finite floats have no SQL literal.
            Value::Float(f) if f.is_finite() => f.to_string(),
            Value::Float(_) => String::from("NULL"),
            Value::Text(s) => format!("'{}'", self.escape_string(s)),
            Value::Date(d) => self.format_date(d),
            Value::Time(t) => self.format_time(t),
            Value::DateTime(dt) => self.format_datetime(dt),
            Value::List(items) => format!("'{}'", self.escape_string(&items.join(","))),
            Value::Json(v) => format!("'{}'", self.escape_string(&v.to_string())),
        }
    }

    /// Conditional expression.
    fn if_expr(&self, cond: &str, then: &str, otherwise: &str) -> String {
        format!("IF({cond}, {then}, {otherwise})")
    }

    /// INSERT of a row with no explicit columns (every value engine- or
    /// default-assigned).
    fn empty_insert(&self, table: &str) -> String {
        format!("INSERT INTO {table} () VALUES ()")
    }

    /// String concatenation.
    fn concat(&self, parts: &[String]) -> String {
        format!("concat({})", parts.join(", "))
    }

    /// Extracts a JSON sub-document. `path` is a `$."a"."b"` path literal
    /// without quotes.
    fn json_extract(&self, col: &str, path: &str) -> String {
        format!("json_extract({col}, '{path}')")
    }

    /// Unwraps a JSON scalar to its SQL value.
    fn json_unquote(&self, expr: &str) -> String {
        format!("json_unquote({expr})")
    }

    /// Sets a JSON sub-document inside `target`, which is a complete SQL
    /// expression (the builder supplies the NULL-to-empty-object
    /// coalescing).
    fn json_set(&self, target: &str, path: &str, value: &str) -> String {
        format!("json_set({target}, '{path}', {value})")
    }

    /// Coerces an expression holding serialized JSON text into a JSON
    /// value, for embedding inside `json_set`.
    fn as_json(&self, expr: &str) -> String {
        format!("cast({expr} as json)")
    }

    /// JSON array element count.
    fn json_length(&self, expr: &str) -> String {
        format!("json_array_length({expr})")
    }

    /// JSON array element containment. `candidate` is an escaped string
    /// literal holding the serialized element.
    fn json_contains(&self, col: &str, candidate: &str) -> String {
        format!("json_contains({col}, {candidate})")
    }

    /// Correlated aggregation over the elements of a JSON array value,
    /// used when an aggregation appears outside a grouping context.
    fn aggregate_over_json(&self, op: AggrOp, inner: &str, alias: &str) -> String {
        format!(
            "(SELECT {} FROM json_each({inner}) {alias})",
            aggregate_sql(op, "value")
        )
    }

    /// LIMIT/OFFSET clause, including the leading space when non-empty.
    fn limit_clause(&self, limit: Option<u64>, offset: u64) -> String {
        match (limit, offset) {
            (None, 0) => String::new(),
            (Some(limit), 0) => format!(" LIMIT {limit}"),
            (Some(limit), offset) => format!(" LIMIT {limit} OFFSET {offset}"),
            (None, offset) => format!(" LIMIT -1 OFFSET {offset}"),
        }
    }

    /// Column type for DDL. `auto_inc_primary` is set when the field is
    /// the scalar auto-increment primary key.
    fn column_type(&self, field: &Field, auto_inc_primary: bool) -> Result<String>;

    /// Keyword appended to the auto-increment primary column definition.
    fn auto_increment_clause(&self) -> &'static str;
}

/// A standard-SQL dialect used by the core unit tests. Drivers do not
/// use it; they ship their own implementations.
#[derive(Debug, Clone, Default)]
pub struct GenericDialect;

impl GenericDialect {
    /// Creates the generic dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for GenericDialect {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn column_type(&self, field: &Field, auto_inc_primary: bool) -> Result<String> {
        Ok(match field.ty {
            FieldType::Primary if auto_inc_primary => String::from("INTEGER"),
            FieldType::Primary | FieldType::Integer => String::from("INTEGER"),
            FieldType::Unsigned => String::from("INTEGER"),
            FieldType::Boolean => String::from("BOOLEAN"),
            FieldType::Float | FieldType::Double => String::from("DOUBLE"),
            FieldType::Decimal => {
                let precision = field.precision.unwrap_or(10);
                let scale = field.scale.unwrap_or(0);
                format!("DECIMAL({precision}, {scale})")
            }
            FieldType::Char => format!("CHAR({})", field.length.unwrap_or(64)),
            FieldType::String => format!("VARCHAR({})", field.length.unwrap_or(255)),
            FieldType::Text | FieldType::List | FieldType::Json => String::from("TEXT"),
            FieldType::Date => String::from("DATE"),
            FieldType::Time => String::from("TIME"),
            FieldType::Timestamp => String::from("TIMESTAMP"),
        })
    }

    fn auto_increment_clause(&self) -> &'static str {
        "AUTO_INCREMENT"
    }
}

/// Builds a `$."a"."b"` JSON path literal from a dotted sub-path.
#[must_use]
pub fn json_path(sub_path: &str) -> String {
    let mut path = String::from("$");
    for part in sub_path.split('.') {
        path.push_str(&format!(".\"{part}\""));
    }
    path
}

/// Rejects field types a dialect cannot map; shared helper for driver
/// dialects.
pub fn unmappable(dialect: &str, ty: FieldType) -> StrataError {
    StrataError::SchemaMismatch(format!("{dialect} cannot store {ty:?} fields"))
}
