//! `DuckDB` connection pool.
//!
//! One database instance is opened per warehouse; pooled connections are
//! clones of it, so every connection sees the same catalog and no second file
//! lock is ever taken.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ::duckdb::Connection;

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// Pool of connections to a single `DuckDB` database file.
#[derive(Clone)]
pub struct DuckDbPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for DuckDbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbPool")
            .field("db_path", &self.inner.db_path)
            .field("max_idle", &self.inner.max_idle)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DuckDbPool {
    /// Opens the database at `path` and keeps up to `max_idle` spare
    /// connections around for reuse.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    pub fn open(path: impl Into<PathBuf>, max_idle: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        let root = Connection::open(db_path.as_path())?;
        configure_connection(&root)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                db_path,
                max_idle: max_idle.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Takes an idle connection or clones a new one from the root.
    ///
    /// # Errors
    /// Returns an error if a new connection cannot be created.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let pooled = lock(&self.inner.idle).pop();

        let connection = match pooled {
            Some(connection) => connection,
            None => {
                let connection = lock(&self.inner.root).try_clone()?;
                configure_connection(&connection)?;
                connection
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    /// Number of connections currently parked in the pool.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        lock(&self.inner.idle).len()
    }
}

/// A pooled connection that goes back to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        match self.connection.as_ref() {
            Some(connection) => connection,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.connection.as_mut() {
            Some(connection) => connection,
            None => unreachable!("connection is only taken in drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = lock(&self.pool.idle);
        if idle.len() < self.pool.max_idle {
            idle.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn released_connections_are_reused_up_to_the_idle_limit() {
        let temp = tempdir().expect("tempdir");
        let pool = DuckDbPool::open(temp.path().join("pool.duckdb"), 1).expect("open");

        let first = pool.acquire().expect("first");
        let second = pool.acquire().expect("second");
        drop(first);
        drop(second);
        assert_eq!(pool.idle_count(), 1);

        let reused = pool.acquire().expect("reused");
        assert_eq!(pool.idle_count(), 0);
        drop(reused);
    }

    #[test]
    fn cloned_connections_share_the_catalog() {
        let temp = tempdir().expect("tempdir");
        let pool = DuckDbPool::open(temp.path().join("shared.duckdb"), 2).expect("open");

        let writer = pool.acquire().expect("writer");
        writer
            .execute_batch("CREATE TABLE probe (id INTEGER); INSERT INTO probe VALUES (7);")
            .expect("create");

        let reader = pool.acquire().expect("reader");
        let id: i32 = reader
            .query_row("SELECT id FROM probe", [], |row| row.get(0))
            .expect("select");
        assert_eq!(id, 7);
    }
}
