//! MySQL SQL emission.

use strata_core::builder::Dialect;
use strata_core::error::Result;
use strata_core::eval::AggrOp;
use strata_core::field::{Field, FieldType};

/// The MySQL dialect.
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates the dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    // Backslashes are escape characters in MySQL string literals.
    fn escape_string(&self, s: &str) -> String {
        s.replace('\\', "\\\\").replace('\'', "''")
    }

    fn json_length(&self, expr: &str) -> String {
        format!("json_length({expr})")
    }

    fn aggregate_over_json(&self, op: AggrOp, inner: &str, alias: &str) -> String {
        format!(
            "(SELECT {} FROM json_table({inner}, '$[*]' COLUMNS (value JSON PATH '$')) {alias})",
            strata_core::builder::aggregate_sql(op, "value")
        )
    }

    fn limit_clause(&self, limit: Option<u64>, offset: u64) -> String {
        match (limit, offset) {
            (None, 0) => String::new(),
            (Some(limit), 0) => format!(" LIMIT {limit}"),
            (Some(limit), offset) => format!(" LIMIT {limit} OFFSET {offset}"),
            // MySQL requires a LIMIT before OFFSET; this is the
            // documented "all rows" idiom.
            (None, offset) => format!(" LIMIT 18446744073709551615 OFFSET {offset}"),
        }
    }

    fn column_type(&self, field: &Field, auto_inc_primary: bool) -> Result<String> {
        Ok(match field.ty {
            FieldType::Primary if auto_inc_primary => String::from("INT UNSIGNED"),
            FieldType::Primary | FieldType::Unsigned => String::from("INT UNSIGNED"),
            FieldType::Boolean => String::from("TINYINT(1)"),
            FieldType::Integer => String::from("INT"),
            FieldType::Float => String::from("FLOAT"),
            FieldType::Double => String::from("DOUBLE"),
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
            FieldType::Timestamp => String::from("DATETIME"),
        })
    }

    fn auto_increment_clause(&self) -> &'static str {
        "AUTO_INCREMENT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use strata_core::value::Value;

    #[test]
    fn temporal_literals_are_formatted_strings() {
        let d = MySqlDialect::new();
        let date = NaiveDate::from_ymd_opt(1970, 8, 17).unwrap();
        assert_eq!(d.escape_value(&Value::Date(date), None), "'1970-08-17'");
        assert_eq!(
            d.escape_value(
                &Value::DateTime(date.and_hms_opt(12, 30, 0).unwrap()),
                None
            ),
            "'1970-08-17 12:30:00'"
        );
    }

    #[test]
    fn backslashes_are_doubled() {
        let d = MySqlDialect::new();
        assert_eq!(
            d.escape_value(&Value::Text("a\\b'c".into()), None),
            "'a\\\\b''c'"
        );
    }

    #[test]
    fn offset_without_limit_uses_all_rows_idiom() {
        let d = MySqlDialect::new();
        assert_eq!(
            d.limit_clause(None, 10),
            " LIMIT 18446744073709551615 OFFSET 10"
        );
    }
}
