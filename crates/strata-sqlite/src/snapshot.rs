//! Debounced snapshot-to-file persistence.
//!
//! The driver works against an in-memory database; the configured path
//! is its durable copy. Every mutation schedules a flush, writes inside
//! one scheduler tick coalesce into a single file write, and `stop`
//! flushes anything still outstanding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::{Connection, DatabaseName};
use strata_core::error::{Result, StrataError};
use tracing::{debug, warn};

use crate::worker::Worker;

/// The in-memory sentinel path; disables persistence entirely.
pub const MEMORY_PATH: &str = ":memory:";

#[derive(Clone)]
pub(crate) struct Snapshot {
    path: Option<Arc<str>>,
    pending: Arc<AtomicBool>,
}

impl Snapshot {
    pub(crate) fn new(path: &str) -> Self {
        Self {
            path: (path != MEMORY_PATH).then(|| Arc::from(path)),
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Schedules a debounced flush; at most one is pending at a time.
    pub(crate) fn schedule(&self, worker: &Worker) {
        let Some(path) = self.path.clone() else {
            return;
        };
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = Arc::clone(&self.pending);
        let worker = worker.clone();
        tokio::spawn(async move {
            // Let every write queued in this tick land first.
            tokio::task::yield_now().await;
            pending.store(false, Ordering::Release);
            if let Err(e) = worker.call(move |conn| persist(conn, &path)).await {
                warn!(error = %e, "snapshot flush failed");
            }
        });
    }

    /// Writes the snapshot now. Called at teardown, before the worker
    /// goes away; unconditional, so a debounced flush still in flight
    /// cannot race the shutdown.
    pub(crate) async fn flush(&self, worker: &Worker) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        self.pending.store(false, Ordering::Release);
        worker.call(move |conn| persist(conn, &path)).await
    }
}

fn persist(conn: &mut Connection, path: &str) -> Result<()> {
    debug!(path, "writing database snapshot");
    conn.backup(DatabaseName::Main, path, None)
        .map_err(|e| StrataError::Storage(format!("snapshot write failed: {e}")))
}

/// Restores the file at `path` into the in-memory connection, if it
/// exists. A missing file means an empty database.
pub(crate) fn restore(conn: &mut Connection, path: &str) -> Result<()> {
    if path == MEMORY_PATH || !std::path::Path::new(path).exists() {
        return Ok(());
    }
    debug!(path, "restoring database snapshot");
    conn.restore(DatabaseName::Main, path, None::<fn(rusqlite::backup::Progress)>)
        .map_err(|e| StrataError::Storage(format!("snapshot restore failed: {e}")))
}
