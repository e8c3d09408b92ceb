//! The contract a storage backend implements.

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::Result;
use crate::eval::Eval;
use crate::selection::Selection;
use crate::value::{Object, Value};

/// Row count and on-disk size of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Number of rows.
    pub count: u64,
    /// Size in bytes, 0 when the engine cannot report it.
    pub size: u64,
}

/// Aggregate storage statistics.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    /// Total database size in bytes.
    pub size: u64,
    /// Per-table statistics.
    pub tables: HashMap<String, TableStats>,
}

/// A storage backend.
///
/// Methods that reach the database may suspend; query compilation never
/// does. Within one driver instance operations observe program order.
/// Statements are built completely before submission, so a cancelled
/// call either completes or leaves the database untouched.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Acquires the connection or pool and registers engine extensions.
    async fn start(&self) -> Result<()>;

    /// Releases the connection or pool; idempotent. Flushes any pending
    /// persistence work first.
    async fn stop(&self) -> Result<()>;

    /// Synchronizes the live schema of `table` with its declared model.
    /// Idempotent: a second call against a synchronized schema issues no
    /// DDL. `drop_keys` lists live columns migration hooks allow to drop.
    async fn prepare(&self, table: &str, drop_keys: &[String]) -> Result<()>;

    /// Drops one table, or every registered table when `None`.
    async fn drop_table(&self, table: Option<&str>) -> Result<()>;

    /// Storage statistics.
    async fn stats(&self) -> Result<Stats>;

    /// Returns the matching rows, each passed through the caster.
    async fn get(&self, sel: &Selection) -> Result<Vec<Object>>;

    /// Evaluates a scalar expression over the selection.
    async fn eval(&self, sel: &Selection, expr: &Eval) -> Result<Value>;

    /// Updates matching rows; update expressions may reference row
    /// fields. Returns the number of affected rows.
    async fn set(&self, sel: &Selection, update: &IndexMap<String, Eval>) -> Result<u64>;

    /// Deletes matching rows; a constant-false filter is a no-op.
    /// Returns the number of deleted rows.
    async fn remove(&self, sel: &Selection) -> Result<u64>;

    /// Inserts one row and returns it as stored, including any assigned
    /// auto-increment id.
    async fn create(&self, sel: &Selection, data: &Object) -> Result<Object>;

    /// For each item: update the row matching `keys`, or insert a fresh
    /// row built from model defaults plus the item.
    async fn upsert(&self, sel: &Selection, data: &[Object], keys: &[String]) -> Result<()>;
}

/// Top-level field names touched by any upsert item; dotted paths map to
/// their root field. Order follows first appearance.
#[must_use]
pub fn data_fields(data: &[Object]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for item in data {
        for key in item.keys() {
            let root = key.split('.').next().unwrap_or(key.as_str());
            if !fields.iter().any(|f| f == root) {
                fields.push(root.to_string());
            }
        }
    }
    fields
}

/// Fields an upsert writes on conflict: every touched field except the
/// match keys. Falls back to the first touched field so the UPDATE arm
/// stays well-formed.
#[must_use]
pub fn update_fields(data: &[Object], keys: &[String]) -> Vec<String> {
    let fields = data_fields(data);
    let update: Vec<String> = fields
        .iter()
        .filter(|f| !keys.contains(f))
        .cloned()
        .collect();
    if update.is_empty() {
        fields.into_iter().take(1).collect()
    } else {
        update
    }
}
