//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at an explicit path.
    ///
    /// Parent directories are created as needed.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database.  Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection, needed to
    /// open a transaction.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Resolve the outcome of a `... WHERE key = ? AND version = ?` update.
    ///
    /// Zero affected rows means either the record is gone or somebody else
    /// bumped the version first; the two are told apart with a follow-up probe.
    pub(crate) fn check_versioned(
        conn: &Connection,
        affected: usize,
        table: &str,
        key_column: &str,
        key: &str,
    ) -> Result<()> {
        if affected > 0 {
            return Ok(());
        }
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {key_column} = ?1)");
        let exists: bool = conn.query_row(&sql, params![key], |row| row.get(0))?;
        if exists {
            tracing::debug!(table, key, "versioned write lost the race");
            Err(StoreError::Conflict)
        } else {
            Err(StoreError::NotFound)
        }
    }
}
