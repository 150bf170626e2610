//! Schema migrations, applied in order when a database is opened.
//!
//! `PRAGMA user_version` records the last step applied.  Each step runs in
//! its own transaction together with the version bump, so a failure leaves
//! the schema at the previous version.

pub mod v001_initial;
pub mod v002_files_views;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

const STEPS: &[(&str, Step)] = &[
    ("v001_initial", v001_initial::up),
    ("v002_files_views", v002_files_views::up),
];

/// Schema version after every step has run.
pub const CURRENT_VERSION: u32 = STEPS.len() as u32;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if applied > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at schema version {applied}, newer than this build ({CURRENT_VERSION})"
        )));
    }

    for (version, (name, up)) in (1u32..).zip(STEPS).skip(applied as usize) {
        tracing::info!(version, name, "applying migration");
        let tx = conn.unchecked_transaction()?;
        up(&*tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    tracing::debug!(version = CURRENT_VERSION, "schema up to date");
    Ok(())
}
