//! The pooled MySQL driver.
//!
//! Statements funnel through the pending-batch queue, which preserves
//! program order and coalesces the statements of one scheduler tick
//! onto one pooled connection. Updates compile eval expressions into
//! the statement itself, so row-referencing updates need no fetch.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use tracing::info;

use strata_core::builder::{BuildState, Builder, Dialect, SqlKind};
use strata_core::caster::Caster;
use strata_core::driver::{update_fields, Driver, Stats, TableStats};
use strata_core::error::{Result, StrataError};
use strata_core::eval::Eval;
use strata_core::model::Registry;
use strata_core::selection::Selection;
use strata_core::value::{Object, Row, Value};

use crate::batch::{BatchQueue, Outcome};
use crate::dialect::MySqlDialect;
use crate::sync::prepare_table;

/// Driver configuration; defaults follow the conventional local setup.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 3306,
            user: String::from("root"),
            password: String::new(),
            database: String::from("strata"),
        }
    }
}

/// The pooled MySQL driver.
pub struct MySqlDriver {
    config: MySqlConfig,
    registry: Arc<Registry>,
    caster: Caster,
    queue: Mutex<Option<Arc<BatchQueue>>>,
}

impl MySqlDriver {
    /// Creates the driver; `start` acquires the pool.
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: MySqlConfig) -> Self {
        Self {
            config,
            registry,
            caster: Caster::new(),
            queue: Mutex::new(None),
        }
    }

    fn queue(&self) -> Result<Arc<BatchQueue>> {
        self.queue
            .lock()
            .expect("queue lock poisoned")
            .clone()
            .ok_or_else(|| StrataError::Storage("driver not started".into()))
    }

    fn load_projected(&self, sel: &Selection, state: &BuildState, row: Row) -> Result<Object> {
        let mut object = Object::new();
        for (key, value) in row {
            if let Some(field) = sel.model.field(&key) {
                object.insert(
                    key,
                    self.caster
                        .load_value(field.ty, value, field.initial.as_ref())?,
                );
            } else {
                let kind = state.sql_types.get(&key).copied().unwrap_or_default();
                object.insert(key, decode_kind(kind, value));
            }
        }
        Ok(object)
    }
}

fn decode_kind(kind: SqlKind, value: Value) -> Value {
    match (kind, value) {
        (SqlKind::Json, Value::Text(s)) => serde_json::from_str(&s)
            .map(Value::Json)
            .unwrap_or(Value::Text(s)),
        (SqlKind::List, Value::Text(s)) => {
            if s.is_empty() {
                Value::List(Vec::new())
            } else {
                Value::List(s.split(',').map(String::from).collect())
            }
        }
        (_, value) => value,
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    async fn start(&self) -> Result<()> {
        if self.queue.lock().expect("queue lock poisoned").is_some() {
            return Ok(());
        }
        let options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database)
            .charset("utf8mb4");
        let pool = MySqlPoolOptions::new().connect_lazy_with(options);
        *self.queue.lock().expect("queue lock poisoned") = Some(BatchQueue::new(pool));
        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            "mysql driver started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let queue = self.queue.lock().expect("queue lock poisoned").take();
        if let Some(queue) = queue {
            queue.close().await;
        }
        Ok(())
    }

    async fn prepare(&self, table: &str, drop_keys: &[String]) -> Result<()> {
        let model = self.registry.model(table)?;
        prepare_table(&self.queue()?, &model, drop_keys).await
    }

    async fn drop_table(&self, table: Option<&str>) -> Result<()> {
        let tables = match table {
            Some(name) => vec![name.to_string()],
            None => self.registry.tables(),
        };
        let dialect = MySqlDialect::new();
        let queue = self.queue()?;
        for name in tables {
            queue
                .exec(
                    &name,
                    format!("DROP TABLE IF EXISTS {}", dialect.escape_id(&name)),
                )
                .await?;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        let queue = self.queue()?;
        let rows = queue
            .fetch(
                "information_schema",
                String::from(
                    "SELECT TABLE_NAME AS name, TABLE_ROWS AS count, \
                     DATA_LENGTH + INDEX_LENGTH AS size \
                     FROM information_schema.TABLES \
                     WHERE table_schema = database()",
                ),
            )
            .await?;
        let registered = self.registry.tables();
        let mut stats = Stats::default();
        for row in rows {
            let name = match row.get("name") {
                Some(Value::Text(s)) => s.clone(),
                _ => continue,
            };
            if !registered.contains(&name) {
                continue;
            }
            let count = row.get("count").and_then(Value::as_i64).unwrap_or(0) as u64;
            let size = row.get("size").and_then(Value::as_i64).unwrap_or(0) as u64;
            stats.size += size;
            stats.tables.insert(name, TableStats { count, size });
        }
        Ok(stats)
    }

    async fn get(&self, sel: &Selection) -> Result<Vec<Object>> {
        let dialect = MySqlDialect::new();
        let builder = Builder::new(&dialect, sel);
        let mut state = BuildState::new();
        let Some(sql) = builder.select(&mut state)? else {
            return Ok(Vec::new());
        };
        let rows = self.queue()?.fetch(&sel.table, sql).await?;
        if sel.fields.is_some() {
            rows.into_iter()
                .map(|row| self.load_projected(sel, &state, row))
                .collect()
        } else {
            rows.iter()
                .map(|row| self.caster.load(&sel.model, row))
                .collect()
        }
    }

    async fn eval(&self, sel: &Selection, expr: &Eval) -> Result<Value> {
        let dialect = MySqlDialect::new();
        let builder = Builder::new(&dialect, sel);
        let mut state = BuildState::new();
        let sql = builder.eval_statement(expr, &mut state)?;
        let rows = self.queue()?.fetch(&sel.table, sql).await?;
        let value = rows
            .into_iter()
            .next()
            .and_then(|mut row| row.shift_remove("value"))
            .unwrap_or(Value::Null);
        Ok(decode_kind(state.sql_type, value))
    }

    async fn set(&self, sel: &Selection, update: &IndexMap<String, Eval>) -> Result<u64> {
        let dialect = MySqlDialect::new();
        let builder = Builder::new(&dialect, sel);
        // Eval expressions compile straight into the statement, so the
        // row-referencing form needs no fetch here.
        match builder.update(update, &mut BuildState::new())? {
            Some(sql) => match self.queue()?.exec(&sel.table, sql).await? {
                Outcome::Done { rows_affected, .. } => Ok(rows_affected),
                Outcome::Rows(_) => Ok(0),
            },
            None => Ok(0),
        }
    }

    async fn remove(&self, sel: &Selection) -> Result<u64> {
        let dialect = MySqlDialect::new();
        let builder = Builder::new(&dialect, sel);
        match builder.delete(&mut BuildState::new())? {
            Some(sql) => match self.queue()?.exec(&sel.table, sql).await? {
                Outcome::Done { rows_affected, .. } => Ok(rows_affected),
                Outcome::Rows(_) => Ok(0),
            },
            None => Ok(0),
        }
    }

    async fn create(&self, sel: &Selection, data: &Object) -> Result<Object> {
        let mut object = sel.model.create(data)?;
        if sel.model.auto_inc {
            let pk = sel.model.primary[0].clone();
            if object.get(&pk).map_or(true, Value::is_null) {
                object.shift_remove(&pk);
            }
        }
        let row = self.caster.dump(&sel.model, &object)?;
        let dialect = MySqlDialect::new();
        let sql = Builder::new(&dialect, sel).insert(&row)?;
        let outcome = self.queue()?.exec(&sel.table, sql).await?;
        if sel.model.auto_inc {
            if let Outcome::Done { last_insert_id, .. } = outcome {
                let pk = sel.model.primary[0].clone();
                object.insert(pk, Value::UInt(last_insert_id));
            }
        }
        Ok(object)
    }

    async fn upsert(&self, sel: &Selection, data: &[Object], keys: &[String]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = if keys.is_empty() {
            sel.model.primary.clone()
        } else {
            keys.to_vec()
        };
        if keys.is_empty() {
            return Err(StrataError::QueryMalformed(
                "upsert requires match keys or a primary key".into(),
            ));
        }
        let sql = build_upsert(sel, data, &keys, &self.caster)?;
        self.queue()?.exec(&sel.table, sql).await?;
        Ok(())
    }
}

/// Builds the single `INSERT … ON DUPLICATE KEY UPDATE` statement that
/// realizes the upsert contract: one VALUES tuple per item over the full
/// declared column set, and per update field a chain of IFs keyed on the
/// conflicting row's key tuple, first matching item winning.
fn build_upsert(
    sel: &Selection,
    data: &[Object],
    keys: &[String],
    caster: &Caster,
) -> Result<String> {
    let update = update_fields(data, keys);
    let dialect = MySqlDialect::new();
    let builder = Builder::new(&dialect, sel);
    let model = &sel.model;

    let columns: Vec<&String> = model
        .fields
        .iter()
        .filter(|(_, field)| !field.deprecated)
        .map(|(name, _)| name)
        .collect();

    // NULL in the auto-increment column lets the engine assign it.
    let mut tuples = Vec::with_capacity(data.len());
    let mut objects = Vec::with_capacity(data.len());
    for item in data {
        let object = model.create(item)?;
        let row = caster.dump(model, &object)?;
        let values: Vec<String> = columns
            .iter()
            .map(|name| {
                let field = &model.fields[*name];
                row.get(*name).map_or_else(
                    || String::from("NULL"),
                    |v| dialect.escape_value(v, Some(field)),
                )
            })
            .collect();
        tuples.push(format!("({})", values.join(", ")));
        objects.push(object);
    }

    let mut clauses = Vec::with_capacity(update.len());
    for field_name in &update {
        let column = dialect.escape_id(field_name);
        let mut acc = column.clone();
        for (object, item) in objects.iter().zip(data).rev() {
            let entries: IndexMap<String, Eval> = item
                .iter()
                .filter(|(path, _)| path.split('.').next().unwrap_or(path.as_str()) == field_name)
                .map(|(path, value)| (path.clone(), Eval::Literal(value.clone())))
                .collect();
            if entries.is_empty() {
                continue;
            }
            let exprs = builder.assignment_exprs(&entries, &mut BuildState::new())?;
            let Some(expr) = exprs.get(field_name.as_str()) else {
                continue;
            };
            let cond = keys
                .iter()
                .map(|key| {
                    let field = &model.fields[key];
                    let value = caster
                        .dump_value(field.ty, object.get(key).cloned().unwrap_or(Value::Null));
                    format!(
                        "{} = {}",
                        dialect.escape_id(key),
                        dialect.escape_value(&value, Some(field))
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            acc = dialect.if_expr(&cond, expr, &acc);
        }
        clauses.push(format!("{column} = {acc}"));
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
        dialect.escape_id(&sel.table),
        columns
            .iter()
            .map(|name| dialect.escape_id(name))
            .collect::<Vec<_>>()
            .join(", "),
        tuples.join(", "),
        clauses.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::field::{Field, FieldType};
    use strata_core::model::{Model, ModelOptions};

    fn bar() -> Selection {
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Field::new(FieldType::Unsigned));
        fields.insert("text".to_string(), Field::new(FieldType::String));
        fields.insert("num".to_string(), Field::new(FieldType::Integer));
        Selection::new(Arc::new(
            Model::new("bar", fields, ModelOptions::auto_inc("id")).unwrap(),
        ))
    }

    fn object(pairs: Vec<(&str, Value)>) -> Object {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn upsert_chains_ifs_per_item() {
        let sel = bar();
        let data = vec![
            object(vec![("id", Value::Int(2)), ("num", Value::Int(1911))]),
            object(vec![("id", Value::Int(99)), ("text", Value::from("new"))]),
        ];
        let sql = build_upsert(&sel, &data, &[String::from("id")], &Caster::new()).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `bar` (`id`, `text`, `num`) \
             VALUES (2, NULL, 1911), (99, 'new', NULL) \
             ON DUPLICATE KEY UPDATE \
             `num` = IF(`id` = 2, 1911, `num`), \
             `text` = IF(`id` = 99, 'new', `text`)"
        );
    }

    #[test]
    fn upsert_falls_back_to_a_key_field_when_nothing_else_changes() {
        let sel = bar();
        let data = vec![object(vec![("id", Value::Int(7))])];
        let sql = build_upsert(&sel, &data, &[String::from("id")], &Caster::new()).unwrap();
        assert!(sql.contains("ON DUPLICATE KEY UPDATE `id` = IF(`id` = 7, 7, `id`)"));
    }

    #[test]
    fn upsert_folds_dotted_paths_through_json_set() {
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Field::new(FieldType::Unsigned));
        fields.insert("meta".to_string(), Field::new(FieldType::Json));
        let sel = Selection::new(Arc::new(
            Model::new("doc", fields, ModelOptions::auto_inc("id")).unwrap(),
        ));
        let data = vec![object(vec![
            ("id", Value::Int(1)),
            ("meta.a", Value::Int(5)),
        ])];
        let sql = build_upsert(&sel, &data, &[String::from("id")], &Caster::new()).unwrap();
        assert!(sql.contains(
            "`meta` = IF(`id` = 1, json_set(ifnull(`meta`, '{}'), '$.\"a\"', 5), `meta`)"
        ));
    }
}
