//! Schema synchronization executor.
//!
//! SQLite only supports RENAME and ADD COLUMN forms of ALTER TABLE, so
//! renames and type changes use the table-recreation strategy: create a
//! temp table with the declared shape, copy the mapped columns across,
//! drop the original, rename the temp into place. A failed copy drops
//! the temp table and rethrows.

use rusqlite::Connection;
use strata_core::builder::Dialect;
use strata_core::error::Result;
use strata_core::model::Model;
use strata_core::sync::{plan, LiveColumn, SyncAction};
use tracing::{debug, info};

use crate::dialect::SqliteDialect;
use crate::stmt::{execute, fetch_rows, storage_error};

/// Reads the live columns of `table` via `PRAGMA table_info`.
pub(crate) fn introspect(conn: &Connection, table: &str) -> Result<Vec<LiveColumn>> {
    let dialect = SqliteDialect::new();
    let sql = format!("PRAGMA table_info({})", dialect.escape_id(table));
    let mut stmt = conn.prepare(&sql).map_err(|e| storage_error(table, &e))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(LiveColumn {
                name: row.get::<_, String>("name")?,
                type_name: row.get::<_, String>("type")?,
                nullable: !row.get::<_, bool>("notnull")?,
                default: row.get::<_, Option<String>>("dflt_value")?,
                primary: row.get::<_, i64>("pk")? > 0,
            })
        })
        .map_err(|e| storage_error(table, &e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| storage_error(table, &e))?;
    Ok(columns)
}

/// Synchronizes one table to its declared model. Idempotent.
pub(crate) fn prepare_table(
    conn: &mut Connection,
    model: &Model,
    drop_keys: &[String],
) -> Result<()> {
    let dialect = SqliteDialect::new();
    let table = model.name.as_str();
    let live = introspect(conn, table)?;
    match plan(model, &live, drop_keys, &dialect)? {
        SyncAction::None => {
            debug!(table, "schema already synchronized");
            Ok(())
        }
        SyncAction::Create {
            columns,
            constraints,
        } => {
            info!(table, "creating table");
            let mut defs = columns;
            defs.extend(constraints);
            execute(
                conn,
                table,
                &format!(
                    "CREATE TABLE {} ({})",
                    dialect.escape_id(table),
                    defs.join(", ")
                ),
            )?;
            Ok(())
        }
        SyncAction::Add { columns } => {
            info!(table, added = columns.len(), "adding columns");
            for def in columns {
                execute(
                    conn,
                    table,
                    &format!("ALTER TABLE {} ADD COLUMN {def}", dialect.escape_id(table)),
                )?;
            }
            Ok(())
        }
        SyncAction::Rebuild {
            columns,
            constraints,
            mapping,
        } => {
            info!(table, "rebuilding table through temp copy");
            let temp = format!("{table}_temp");
            let mut defs = columns;
            defs.extend(constraints);
            execute(
                conn,
                table,
                &format!(
                    "CREATE TABLE {} ({})",
                    dialect.escape_id(&temp),
                    defs.join(", ")
                ),
            )?;
            let dest: Vec<String> = mapping.iter().map(|m| dialect.escape_id(&m.to)).collect();
            let src: Vec<String> = mapping.iter().map(|m| dialect.escape_id(&m.from)).collect();
            let copy = format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                dialect.escape_id(&temp),
                dest.join(", "),
                src.join(", "),
                dialect.escape_id(table)
            );
            if let Err(e) = execute(conn, table, &copy) {
                execute(
                    conn,
                    table,
                    &format!("DROP TABLE {}", dialect.escape_id(&temp)),
                )?;
                return Err(e);
            }
            execute(conn, table, &format!("DROP TABLE {}", dialect.escape_id(table)))?;
            execute(
                conn,
                table,
                &format!(
                    "ALTER TABLE {} RENAME TO {}",
                    dialect.escape_id(&temp),
                    dialect.escape_id(table)
                ),
            )?;
            Ok(())
        }
    }
}

/// Row count of one table; used by `stats`.
pub(crate) fn table_count(conn: &Connection, table: &str) -> Result<u64> {
    let dialect = SqliteDialect::new();
    let rows = fetch_rows(
        conn,
        table,
        &format!("SELECT count(*) AS c FROM {}", dialect.escape_id(table)),
    )?;
    Ok(rows
        .first()
        .and_then(|row| row.get("c"))
        .and_then(strata_core::value::Value::as_i64)
        .unwrap_or(0) as u64)
}
