//! The embedded SQLite driver.
//!
//! The live database is in-memory; the configured file path is its
//! durable copy, restored at `start` and rewritten by the debounced
//! snapshot after every mutation. All engine work runs on the dedicated
//! connection worker, which also keeps operations in program order.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::DateTime;
use indexmap::IndexMap;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::info;

use strata_core::builder::{BuildState, Builder, Dialect, SqlKind};
use strata_core::caster::{CastPlugin, Caster};
use strata_core::driver::{update_fields, Driver, Stats, TableStats};
use strata_core::error::{Result, StrataError};
use strata_core::eval::Eval;
use strata_core::field::FieldType;
use strata_core::model::{Model, Registry};
use strata_core::query::Query;
use strata_core::selection::Selection;
use strata_core::value::{Object, Row, Value};

use crate::dialect::{date_millis, datetime_millis, time_millis, SqliteDialect};
use crate::snapshot::Snapshot;
use crate::stmt::{execute, fetch_rows};
use crate::sync::{prepare_table, table_count};
use crate::worker::Worker;

/// SQLite upserts match existing rows with an `$or` of key tuples; the
/// engine caps expression-tree depth near 1000, so chunks stay under it.
const EXPR_DEPTH_CEILING: usize = 960;

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Snapshot file path, or `":memory:"` for no persistence.
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: String::from(crate::snapshot::MEMORY_PATH),
        }
    }
}

impl SqliteConfig {
    /// Configuration persisting to the given file.
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// The embedded SQLite driver.
pub struct SqliteDriver {
    config: SqliteConfig,
    registry: Arc<Registry>,
    caster: Caster,
    snapshot: Snapshot,
    worker: Mutex<Option<Worker>>,
}

impl SqliteDriver {
    /// Creates the driver; `start` acquires the connection.
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: SqliteConfig) -> Self {
        let mut caster = Caster::new();
        caster.register(&[FieldType::Date], DateCast);
        caster.register(&[FieldType::Time], TimeCast);
        caster.register(&[FieldType::Timestamp], TimestampCast);
        Self {
            snapshot: Snapshot::new(&config.path),
            config,
            registry,
            caster,
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> Result<Worker> {
        self.worker
            .lock()
            .expect("worker lock poisoned")
            .clone()
            .ok_or_else(|| StrataError::Storage("driver not started".into()))
    }

    async fn run(&self, table: &str, sql: String) -> Result<u64> {
        let worker = self.worker()?;
        let table = table.to_string();
        let affected = worker
            .call(move |conn| execute(conn, &table, &sql))
            .await?;
        self.snapshot.schedule(&worker);
        Ok(affected)
    }

    async fn query(&self, table: &str, sql: String) -> Result<Vec<Row>> {
        let worker = self.worker()?;
        let table = table.to_string();
        worker.call(move |conn| fetch_rows(conn, &table, &sql)).await
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

    async fn insert_object(&self, sel: &Selection, object: &mut Object) -> Result<()> {
        if sel.model.auto_inc {
            let pk = sel.model.primary[0].clone();
            if object.get(&pk).map_or(true, Value::is_null) {
                object.shift_remove(&pk);
            }
        }
        let row = self.caster.dump(&sel.model, object)?;
        let dialect = SqliteDialect::new();
        let sql = Builder::new(&dialect, sel).insert(&row)?;
        let worker = self.worker()?;
        let table = sel.table.clone();
        let rowid = worker
            .call(move |conn| {
                execute(conn, &table, &sql)?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        if sel.model.auto_inc {
            let pk = sel.model.primary[0].clone();
            // Matches what a subsequent load reports for the column.
            object.insert(pk, Value::Int(rowid));
        }
        self.snapshot.schedule(&worker);
        Ok(())
    }

    /// One UPDATE against the rows matched by `filter`.
    async fn update_where(
        &self,
        model: &Arc<Model>,
        filter: Query,
        assignments: &IndexMap<String, Eval>,
    ) -> Result<u64> {
        let selection = Selection::new(Arc::clone(model)).filter(filter);
        let dialect = SqliteDialect::new();
        let builder = Builder::new(&dialect, &selection);
        match builder.update(assignments, &mut BuildState::new())? {
            Some(sql) => self.run(&selection.table, sql).await,
            None => Ok(0),
        }
    }
}

/// Equality filter over the given fields of one row.
fn fields_filter(fields: &[String], object: &Object) -> Query {
    Query::And(
        fields
            .iter()
            .map(|key| {
                Query::eq(key, object.get(key).cloned().unwrap_or(Value::Null))
            })
            .collect(),
    )
}

/// Identifies one loaded row: by primary key, or by every declared value
/// for tables without one.
fn row_identity(model: &Model, object: &Object) -> Query {
    if model.primary.is_empty() {
        let fields: Vec<String> = object.keys().cloned().collect();
        fields_filter(&fields, object)
    } else {
        fields_filter(&model.primary, object)
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
impl Driver for SqliteDriver {
    async fn start(&self) -> Result<()> {
        if self.worker.lock().expect("worker lock poisoned").is_some() {
            return Ok(());
        }
        let path = self.config.path.clone();
        let worker = Worker::spawn(move || {
            let mut conn = Connection::open_in_memory()
                .map_err(|e| StrataError::Storage(format!("open failed: {e}")))?;
            crate::snapshot::restore(&mut conn, &path)?;
            register_functions(&conn)?;
            Ok(conn)
        })
        .await?;
        *self.worker.lock().expect("worker lock poisoned") = Some(worker);
        info!(path = %self.config.path, "sqlite driver started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let worker = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(worker) = worker {
            self.snapshot.flush(&worker).await?;
        }
        Ok(())
    }

    async fn prepare(&self, table: &str, drop_keys: &[String]) -> Result<()> {
        let model = self.registry.model(table)?;
        let drop_keys = drop_keys.to_vec();
        let worker = self.worker()?;
        worker
            .call(move |conn| prepare_table(conn, &model, &drop_keys))
            .await?;
        self.snapshot.schedule(&worker);
        Ok(())
    }

    async fn drop_table(&self, table: Option<&str>) -> Result<()> {
        let tables = match table {
            Some(name) => vec![name.to_string()],
            None => self.registry.tables(),
        };
        let dialect = SqliteDialect::new();
        for name in tables {
            let sql = format!("DROP TABLE IF EXISTS {}", dialect.escape_id(&name));
            self.run(&name, sql).await?;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        let worker = self.worker()?;
        let tables = self.registry.tables();
        worker
            .call(move |conn| {
                let page_count = pragma_u64(conn, "page_count")?;
                let page_size = pragma_u64(conn, "page_size")?;
                let mut stats = Stats {
                    size: page_count * page_size,
                    tables: std::collections::HashMap::new(),
                };
                for table in tables {
                    let count = table_count(conn, &table)?;
                    // dbstat is an optional build flag; missing it just
                    // zeroes the per-table size.
                    let size = table_size(conn, &table).unwrap_or(0);
                    stats.tables.insert(table, TableStats { count, size });
                }
                Ok(stats)
            })
            .await
    }

    async fn get(&self, sel: &Selection) -> Result<Vec<Object>> {
        let dialect = SqliteDialect::new();
        let builder = Builder::new(&dialect, sel);
        let mut state = BuildState::new();
        let Some(sql) = builder.select(&mut state)? else {
            return Ok(Vec::new());
        };
        let rows = self.query(&sel.table, sql).await?;
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
        let dialect = SqliteDialect::new();
        let builder = Builder::new(&dialect, sel);
        let mut state = BuildState::new();
        let sql = builder.eval_statement(expr, &mut state)?;
        let rows = self.query(&sel.table, sql).await?;
        let value = rows
            .into_iter()
            .next()
            .and_then(|mut row| row.shift_remove("value"))
            .unwrap_or(Value::Null);
        Ok(decode_kind(state.sql_type, value))
    }

    async fn set(&self, sel: &Selection, update: &IndexMap<String, Eval>) -> Result<u64> {
        // The update may reference row fields, so fetch the matching
        // rows, evaluate per row, and update each in place.
        let matched = self.get(sel).await?;
        let mut affected = 0;
        for object in matched {
            let mut assignments = IndexMap::new();
            for (path, expr) in update {
                assignments.insert(path.clone(), Eval::Literal(expr.evaluate(&object)?));
            }
            affected += self
                .update_where(&sel.model, row_identity(&sel.model, &object), &assignments)
                .await?;
        }
        Ok(affected)
    }

    async fn remove(&self, sel: &Selection) -> Result<u64> {
        let dialect = SqliteDialect::new();
        let builder = Builder::new(&dialect, sel);
        match builder.delete(&mut BuildState::new())? {
            Some(sql) => self.run(&sel.table, sql).await,
            None => Ok(0),
        }
    }

    async fn create(&self, sel: &Selection, data: &Object) -> Result<Object> {
        let mut object = sel.model.create(data)?;
        self.insert_object(sel, &mut object).await?;
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
        let update = update_fields(data, &keys);
        let chunk_size = (EXPR_DEPTH_CEILING / keys.len()).max(1);
        for chunk in data.chunks(chunk_size) {
            let tuples = Query::Or(
                chunk
                    .iter()
                    .map(|item| fields_filter(&keys, item))
                    .collect(),
            );
            let existing_sel = Selection::new(Arc::clone(&sel.model)).filter(tuples);
            let existing = self.get(&existing_sel).await?;
            for item in chunk {
                let matched = existing.iter().any(|row| {
                    keys.iter().all(|key| {
                        row.get(key)
                            .unwrap_or(&Value::Null)
                            .loose_eq(item.get(key).unwrap_or(&Value::Null))
                    })
                });
                if matched {
                    let assignments: IndexMap<String, Eval> = item
                        .iter()
                        .filter(|(path, _)| {
                            let root = path.split('.').next().unwrap_or(path.as_str());
                            update.iter().any(|f| f == root)
                        })
                        .map(|(path, value)| (path.clone(), Eval::Literal(value.clone())))
                        .collect();
                    if assignments.is_empty() {
                        continue;
                    }
                    self.update_where(&sel.model, fields_filter(&keys, item), &assignments)
                        .await?;
                } else {
                    let mut object = sel.model.create(item)?;
                    self.insert_object(sel, &mut object).await?;
                }
            }
        }
        Ok(())
    }
}

fn pragma_u64(conn: &Connection, name: &str) -> Result<u64> {
    let rows = fetch_rows(conn, name, &format!("PRAGMA {name}"))?;
    Ok(rows
        .first()
        .and_then(|row| row.get(name))
        .and_then(Value::as_i64)
        .unwrap_or(0) as u64)
}

fn table_size(conn: &Connection, table: &str) -> Result<u64> {
    let dialect = SqliteDialect::new();
    let rows = fetch_rows(
        conn,
        table,
        &format!(
            "SELECT sum(pgsize) AS s FROM dbstat WHERE name = {}",
            dialect.escape_value(&Value::Text(table.to_string()), None)
        ),
    )?;
    Ok(rows
        .first()
        .and_then(|row| row.get("s"))
        .and_then(Value::as_i64)
        .unwrap_or(0) as u64)
}

/// Registers the engine UDFs the dialect compiles against.
fn register_functions(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("regexp", 2, flags, |ctx| {
        let Some(pattern) = ctx.get::<Option<String>>(0)? else {
            return Ok(false);
        };
        let Some(text) = ctx.get::<Option<String>>(1)? else {
            return Ok(false);
        };
        let re = Regex::new(&pattern)
            .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
        Ok(re.is_match(&text))
    })
    .map_err(|e| StrataError::Storage(format!("registering regexp failed: {e}")))?;

    conn.create_scalar_function(
        "json_array_contains",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
        let Some(array) = ctx.get::<Option<String>>(0)? else {
            return Ok(false);
        };
        let Some(candidate) = ctx.get::<Option<String>>(1)? else {
            return Ok(false);
        };
        let Ok(array) = serde_json::from_str::<serde_json::Value>(&array) else {
            return Ok(false);
        };
        let Ok(candidate) = serde_json::from_str::<serde_json::Value>(&candidate) else {
            return Ok(false);
        };
        Ok(array
            .as_array()
            .is_some_and(|items| items.contains(&candidate)))
        },
    )
    .map_err(|e| StrataError::Storage(format!("registering json_array_contains failed: {e}")))
}

/// `Date ↔ epoch milliseconds` (midnight).
struct DateCast;

impl CastPlugin for DateCast {
    fn dump(&self, value: Value) -> Value {
        match value {
            Value::Date(d) => Value::Int(date_millis(&d)),
            Value::DateTime(dt) => Value::Int(datetime_millis(&dt)),
            other => other,
        }
    }

    fn load(&self, value: Value, _initial: Option<&Value>) -> Result<Value> {
        load_millis(value)?.map_or(Ok(Value::Null), |ms| {
            DateTime::from_timestamp_millis(ms)
                .map(|dt| Value::Date(dt.naive_utc().date()))
                .ok_or_else(|| StrataError::Storage(format!("date out of range: {ms}")))
        })
    }
}

/// `Time ↔ milliseconds since midnight`.
struct TimeCast;

impl CastPlugin for TimeCast {
    fn dump(&self, value: Value) -> Value {
        match value {
            Value::Time(t) => Value::Int(time_millis(&t)),
            other => other,
        }
    }

    fn load(&self, value: Value, _initial: Option<&Value>) -> Result<Value> {
        load_millis(value)?.map_or(Ok(Value::Null), |ms| {
            let seconds = (ms / 1000) as u32;
            let nanos = ((ms % 1000) * 1_000_000) as u32;
            chrono::NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
                .map(Value::Time)
                .ok_or_else(|| StrataError::Storage(format!("time out of range: {ms}")))
        })
    }
}

/// `DateTime ↔ epoch milliseconds`.
struct TimestampCast;

impl CastPlugin for TimestampCast {
    fn dump(&self, value: Value) -> Value {
        match value {
            Value::DateTime(dt) => Value::Int(datetime_millis(&dt)),
            Value::Date(d) => Value::Int(date_millis(&d)),
            other => other,
        }
    }

    fn load(&self, value: Value, _initial: Option<&Value>) -> Result<Value> {
        load_millis(value)?.map_or(Ok(Value::Null), |ms| {
            DateTime::from_timestamp_millis(ms)
                .map(|dt| Value::DateTime(dt.naive_utc()))
                .ok_or_else(|| StrataError::Storage(format!("timestamp out of range: {ms}")))
        })
    }
}

fn load_millis(value: Value) -> Result<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Int(ms) => Ok(Some(ms)),
        Value::UInt(ms) => Ok(Some(ms as i64)),
        Value::Float(ms) => Ok(Some(ms as i64)),
        other => Err(StrataError::Storage(format!(
            "temporal column holds a non-numeric value: {other:?}"
        ))),
    }
}
