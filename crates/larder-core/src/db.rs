//! Shared SQLite handle.
//!
//! The relational store is the only shared mutable resource in the system.
//! A [`Db`] wraps one connection behind a mutex: the indexing layer takes
//! it synchronously on its own thread, while the serving path dispatches
//! reads through `spawn_blocking` so batch fetches can be awaited jointly
//! without stalling the async runtime.

use crate::error::{Error, Result};
use crate::schema::init_schema;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Shared handle to the SQLite index database.
///
/// Cheap to clone; clones share the same underlying connection.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the database at the given path.
    ///
    /// Applies WAL mode and bootstraps the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening index database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database with the schema applied. For tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection synchronously.
    ///
    /// Used by the indexing layer, which owns its thread and wraps each
    /// event in a transaction. Generic over the caller's error type so each
    /// crate can thread its own `Result` through.
    pub fn with<T, E>(
        &self,
        f: impl FnOnce(&mut Connection) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Run a read-only closure on the blocking thread pool.
    ///
    /// The serving path issues several of these concurrently and awaits
    /// them jointly; each call preserves its own input/output ordering.
    pub async fn read<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: From<Error> + Send + 'static,
        F: FnOnce(&Connection) -> std::result::Result<T, E> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| E::from(Error::Task(e.to_string())))?
    }
}

/// Build a `?,?,...` placeholder list for an `IN (...)` clause.
pub fn sql_placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}
