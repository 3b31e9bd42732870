// Concurrent access wrapper around the embedded SQL engine. One connection,
// single writer at a time; write transactions run inside savepoints so they
// nest and roll back cleanly on error. Every entry point checks the
// cancellation token before touching the connection.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::{CoreError, Result};

pub struct Database {
    conn: Mutex<Connection>,
    savepoint_seq: AtomicU64,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DbOpenFailed {
                message: format!("creating {}: {}", parent.display(), e),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| CoreError::DbOpenFailed {
            message: format!("opening {}: {}", path.display(), e),
        })?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            savepoint_seq: AtomicU64::new(0),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| CoreError::DbOpenFailed {
            message: e.to_string(),
        })?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            savepoint_seq: AtomicU64::new(0),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| CoreError::DbOpenFailed {
                message: format!("configuring journal mode: {}", e),
            })?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;\nPRAGMA foreign_keys = ON;")
            .map_err(|e| CoreError::DbOpenFailed {
                message: format!("configuring connection: {}", e),
            })
    }

    /// Exclusive synchronous access, usable only before the database is
    /// shared (schema setup at open time).
    pub fn with_conn_mut<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        f(self.conn.get_mut()).map_err(Into::into)
    }

    /// Run a read-only closure against the connection.
    pub async fn read<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        cancel.check()?;
        let conn = self.conn.lock().await;
        cancel.check()?;
        f(&conn).map_err(Into::into)
    }

    /// Run a write closure inside a savepoint. The savepoint is released on
    /// success and rolled back on error; unique names let writes nest.
    pub async fn write_tx<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        cancel.check()?;
        let conn = self.conn.lock().await;
        cancel.check()?;

        let name = format!("kohl_sp_{}", self.savepoint_seq.fetch_add(1, Ordering::Relaxed));
        conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch(&format!("RELEASE {}", name))?;
                Ok(value)
            }
            Err(e) => {
                debug!(savepoint = %name, error = %e, "rolling back write transaction");
                // Rollback keeps the savepoint on the stack; release pops it.
                let _ = conn.execute_batch(&format!("ROLLBACK TO {}; RELEASE {}", name, name));
                Err(e.into())
            }
        }
    }

    /// Integrity check used after opening an existing database file.
    pub async fn validate(&self, cancel: &CancellationToken) -> Result<()> {
        let ok: String = self
            .read(cancel, |conn| {
                conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))
            })
            .await?;
        if ok == "ok" {
            Ok(())
        } else {
            Err(CoreError::DbValidateFailed { message: ok })
        }
    }
}
