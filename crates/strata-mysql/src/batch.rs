//! Pending-batch statement queue.
//!
//! Statements issued within one scheduler tick accumulate in a single
//! queue; the first enqueue schedules a flush task, which drains the
//! queue and runs the batch in order on one pooled connection. A failed
//! statement rejects its own task and every task queued behind it in
//! the same batch with the same storage error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::mysql::MySqlRow;
use sqlx::{Column, MySqlPool, Row as _, TypeInfo};
use strata_core::error::{Result, StrataError};
use strata_core::value::{Row, Value};
use tokio::sync::oneshot;
use tracing::debug;

/// Result of one batched statement.
pub(crate) enum Outcome {
    /// Rows of a fetch.
    Rows(Vec<Row>),
    /// Counters of an execute.
    Done {
        rows_affected: u64,
        last_insert_id: u64,
    },
}

enum Kind {
    Fetch,
    Exec,
}

struct Pending {
    sql: String,
    table: String,
    kind: Kind,
    tx: oneshot::Sender<Result<Outcome>>,
}

pub(crate) struct BatchQueue {
    pool: MySqlPool,
    pending: Mutex<Vec<Pending>>,
    scheduled: AtomicBool,
}

impl BatchQueue {
    pub(crate) fn new(pool: MySqlPool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            pending: Mutex::new(Vec::new()),
            scheduled: AtomicBool::new(false),
        })
    }

    /// Closes the underlying pool. Pending batches flush first because
    /// sqlx drains checked-out connections before closing.
    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) async fn fetch(self: &Arc<Self>, table: &str, sql: String) -> Result<Vec<Row>> {
        match self.enqueue(table, sql, Kind::Fetch).await? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Done { .. } => Err(StrataError::Storage("fetch returned no rows".into())),
        }
    }

    pub(crate) async fn exec(self: &Arc<Self>, table: &str, sql: String) -> Result<Outcome> {
        self.enqueue(table, sql, Kind::Exec).await
    }

    async fn enqueue(self: &Arc<Self>, table: &str, sql: String, kind: Kind) -> Result<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("batch lock poisoned")
            .push(Pending {
                sql,
                table: table.to_string(),
                kind,
                tx,
            });
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                // Let the rest of this tick's statements accumulate.
                tokio::task::yield_now().await;
                queue.flush().await;
            });
        }
        rx.await
            .map_err(|_| StrataError::Storage("batch flush dropped the task".into()))?
    }

    async fn flush(self: Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);
        let batch: Vec<Pending> = {
            let mut guard = self.pending.lock().expect("batch lock poisoned");
            std::mem::take(&mut *guard)
        };
        if batch.is_empty() {
            return;
        }
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                let error = StrataError::Storage(format!("pool acquire failed: {e}"));
                for pending in batch {
                    let _ = pending.tx.send(Err(error.clone()));
                }
                return;
            }
        };
        let mut failed: Option<StrataError> = None;
        for pending in batch {
            if let Some(error) = &failed {
                let _ = pending.tx.send(Err(error.clone()));
                continue;
            }
            debug!(sql = %pending.sql, "batch statement");
            let result = match pending.kind {
                Kind::Fetch => sqlx::query(&pending.sql)
                    .fetch_all(&mut *conn)
                    .await
                    .and_then(|rows| {
                        rows.iter()
                            .map(from_row)
                            .collect::<sqlx::Result<Vec<_>>>()
                            .map(Outcome::Rows)
                    }),
                Kind::Exec => sqlx::query(&pending.sql)
                    .execute(&mut *conn)
                    .await
                    .map(|done| Outcome::Done {
                        rows_affected: done.rows_affected(),
                        last_insert_id: done.last_insert_id(),
                    }),
            };
            match result {
                Ok(outcome) => {
                    let _ = pending.tx.send(Ok(outcome));
                }
                Err(e) => {
                    let error = storage_error(&pending.table, &e);
                    let _ = pending.tx.send(Err(error.clone()));
                    failed = Some(error);
                }
            }
        }
    }
}

/// Maps an engine error, turning duplicate-key failures into
/// [`StrataError::DuplicateEntry`].
pub(crate) fn storage_error(table: &str, e: &sqlx::Error) -> StrataError {
    if let sqlx::Error::Database(db) = e {
        if db.code().as_deref() == Some("23000") {
            return StrataError::DuplicateEntry {
                table: table.to_string(),
            };
        }
    }
    StrataError::Storage(e.to_string())
}

/// Decodes one row into a column-name → value map, guided by the
/// column's reported type.
fn from_row(row: &MySqlRow) -> sqlx::Result<Row> {
    let mut map = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = match column.type_info().name() {
            "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
                .try_get::<Option<i64>, _>(i)?
                .map_or(Value::Null, Value::Int),
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(i)?
                .map_or(Value::Null, Value::UInt),
            "FLOAT" => row
                .try_get::<Option<f32>, _>(i)?
                .map_or(Value::Null, |f| Value::Float(f64::from(f))),
            "DOUBLE" => row
                .try_get::<Option<f64>, _>(i)?
                .map_or(Value::Null, Value::Float),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)?
                .map_or(Value::Null, Value::Date),
            "TIME" => row
                .try_get::<Option<chrono::NaiveTime>, _>(i)?
                .map_or(Value::Null, Value::Time),
            "DATETIME" | "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map_or(Value::Null, Value::DateTime),
            _ => row
                .try_get::<Option<String>, _>(i)?
                .map_or(Value::Null, Value::Text),
        };
        map.insert(name, value);
    }
    Ok(map)
}
