//! Schema synchronization executor.
//!
//! MySQL synchronizes additively: missing tables are created, missing
//! columns are added in one ALTER. Renames and type changes are
//! reported but left to manual migration.

use std::sync::Arc;

use strata_core::builder::Dialect;
use strata_core::error::Result;
use strata_core::model::Model;
use strata_core::sync::{missing_columns, plan, LiveColumn, SyncAction};
use strata_core::value::Value;
use tracing::{debug, info, warn};

use crate::batch::BatchQueue;
use crate::dialect::MySqlDialect;

/// Reads the live columns of `table` from `information_schema`.
pub(crate) async fn introspect(queue: &Arc<BatchQueue>, table: &str) -> Result<Vec<LiveColumn>> {
    let dialect = MySqlDialect::new();
    let sql = format!(
        "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, COLUMN_KEY \
         FROM information_schema.columns \
         WHERE table_schema = database() AND table_name = {} \
         ORDER BY ORDINAL_POSITION",
        dialect.escape_value(&Value::Text(table.to_string()), None)
    );
    let rows = queue.fetch(table, sql).await?;
    Ok(rows
        .into_iter()
        .map(|row| LiveColumn {
            name: text(&row, "COLUMN_NAME"),
            type_name: text(&row, "COLUMN_TYPE"),
            nullable: text(&row, "IS_NULLABLE") == "YES",
            default: match row.get("COLUMN_DEFAULT") {
                Some(Value::Null) | None => None,
                Some(value) => Some(display(value)),
            },
            primary: text(&row, "COLUMN_KEY") == "PRI",
        })
        .collect())
}

fn text(row: &strata_core::value::Row, key: &str) -> String {
    match row.get(key) {
        Some(Value::Text(s)) => s.clone(),
        Some(other) => display(other),
        None => String::new(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Int(n) => n.to_string(),
        Value::UInt(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        _ => String::new(),
    }
}

/// Synchronizes one table to its declared model. Idempotent.
pub(crate) async fn prepare_table(
    queue: &Arc<BatchQueue>,
    model: &Model,
    drop_keys: &[String],
) -> Result<()> {
    let dialect = MySqlDialect::new();
    let table = model.name.as_str();
    let live = introspect(queue, table).await?;
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
            queue
                .exec(
                    table,
                    format!(
                        "CREATE TABLE {} ({})",
                        dialect.escape_id(table),
                        defs.join(", ")
                    ),
                )
                .await?;
            Ok(())
        }
        SyncAction::Add { columns } => {
            add_columns(queue, table, &dialect, columns).await
        }
        SyncAction::Rebuild { .. } => {
            // This backend alters additively only; renames and type
            // changes need a manual migration.
            warn!(table, "column renames or type changes left to manual migration");
            let columns = missing_columns(model, &live, &dialect)?;
            if columns.is_empty() {
                return Ok(());
            }
            add_columns(queue, table, &dialect, columns).await
        }
    }
}

async fn add_columns(
    queue: &Arc<BatchQueue>,
    table: &str,
    dialect: &MySqlDialect,
    columns: Vec<String>,
) -> Result<()> {
    info!(table, added = columns.len(), "adding columns");
    let adds: Vec<String> = columns.into_iter().map(|def| format!("ADD {def}")).collect();
    queue
        .exec(
            table,
            format!("ALTER TABLE {} {}", dialect.escape_id(table), adds.join(", ")),
        )
        .await?;
    Ok(())
}
