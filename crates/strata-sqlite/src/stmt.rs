//! Low-level statement execution against the rusqlite connection.
//!
//! Every SQL string is logged on the diagnostic channel here; error
//! payloads carry only the engine message.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use strata_core::error::{Result, StrataError};
use strata_core::value::{Row, Value};
use tracing::debug;

/// Maps an engine error, turning unique-constraint failures into
/// [`StrataError::DuplicateEntry`].
pub(crate) fn storage_error(table: &str, e: &rusqlite::Error) -> StrataError {
    if let rusqlite::Error::SqliteFailure(failure, message) = e {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation
            && message
                .as_deref()
                .is_some_and(|m| m.contains("UNIQUE") || m.contains("PRIMARY KEY"))
        {
            return StrataError::DuplicateEntry {
                table: table.to_string(),
            };
        }
    }
    StrataError::Storage(e.to_string())
}

/// Executes one statement, returning the affected row count.
pub(crate) fn execute(conn: &Connection, table: &str, sql: &str) -> Result<u64> {
    debug!(sql, "execute");
    conn.execute(sql, [])
        .map(|n| n as u64)
        .map_err(|e| storage_error(table, &e))
}

/// Runs a query and collects every row as a column-name → value map.
pub(crate) fn fetch_rows(conn: &Connection, table: &str, sql: &str) -> Result<Vec<Row>> {
    debug!(sql, "query");
    let mut stmt = conn.prepare(sql).map_err(|e| storage_error(table, &e))?;
    let names: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
    let mut rows = stmt.query([]).map_err(|e| storage_error(table, &e))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| storage_error(table, &e))? {
        let mut map = Row::new();
        for (i, name) in names.iter().enumerate() {
            let value = row.get_ref(i).map_err(|e| storage_error(table, &e))?;
            map.insert(name.clone(), from_sql(value));
        }
        out.push(map);
    }
    Ok(out)
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        // No declared field type maps to a blob column.
        ValueRef::Blob(_) => Value::Null,
    }
}
