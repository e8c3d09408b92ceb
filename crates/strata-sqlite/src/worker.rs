//! Dedicated blocking worker owning the SQLite connection.
//!
//! rusqlite is synchronous; all of its work runs on one named thread so
//! async tasks never stall the runtime and operations stay serialized in
//! program order. Async callers submit boxed closures and await a
//! oneshot for the result.

use rusqlite::Connection;
use strata_core::error::{Result, StrataError};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

/// Handle to the connection worker. Cloning shares the same thread.
#[derive(Clone)]
pub(crate) struct Worker {
    tx: std::sync::mpsc::Sender<Job>,
}

impl Worker {
    /// Spawns the worker thread, opening the connection on it. Returns
    /// once the open either succeeded or failed.
    pub(crate) async fn spawn<F>(open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Connection> + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        std::thread::Builder::new()
            .name(String::from("strata-sqlite"))
            .spawn(move || {
                let mut conn = match open() {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(job) = rx.recv() {
                    job(&mut conn);
                }
            })
            .map_err(|e| StrataError::Storage(format!("failed to spawn worker: {e}")))?;
        ready_rx
            .await
            .map_err(|_| StrataError::Storage("worker exited during open".into()))??;
        Ok(Self { tx })
    }

    /// Runs a closure on the connection thread and awaits its result.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(Box::new(move |conn| {
                let _ = tx.send(f(conn));
            }))
            .map_err(|_| StrataError::Storage("connection worker stopped".into()))?;
        rx.await
            .map_err(|_| StrataError::Storage("connection worker stopped".into()))?
    }
}
