//! Chunk storage on SQLite.
//!
//! Every connection runs in WAL mode with foreign keys on and a busy timeout,
//! so several processes can share one history file and queue on the write
//! lock instead of failing with `SQLITE_BUSY`.

pub mod chunk_store;
pub mod compaction;
pub mod migrations;
pub mod partition;
pub mod schema;

pub use chunk_store::ChunkStore;
pub use compaction::{CompactionPolicy, CompactionReport, SizeTieredPolicy};

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// How long a connection waits for the write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the history file at `path`, creating it and its parent directories
/// on first use, and migrate it to the latest schema.
///
/// # Errors
///
/// Fails if the file cannot be created or opened, or the upgrade fails.
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create directory for {}", path.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("open {}", path.display()))?;
    prepare(conn)
}

/// A migrated database that lives only as long as the connection.
///
/// # Errors
///
/// Fails if the schema cannot be created.
pub fn open_in_memory() -> Result<Connection> {
    prepare(Connection::open_in_memory().context("open in-memory history")?)
}

fn prepare(mut conn: Connection) -> Result<Connection> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // In-memory databases stay in `memory` mode.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    let version = migrations::migrate(&mut conn).context("migrate history schema")?;
    tracing::debug!(schema_version = version, "history database ready");
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, open_database, open_in_memory};
    use crate::store::migrations::{LATEST_SCHEMA_VERSION, current_schema_version};

    #[test]
    fn file_databases_use_wal_and_wait_for_locks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a").join("b").join("history.db");
        let conn = open_database(&path).expect("open");
        assert!(path.exists());

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("journal_mode");
        assert!(mode.eq_ignore_ascii_case("wal"));
        let timeout: i64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("busy_timeout");
        assert_eq!(i128::from(timeout), i128::try_from(DEFAULT_BUSY_TIMEOUT.as_millis()).expect("fits"));
        let fk: bool = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("foreign_keys");
        assert!(fk);
    }

    #[test]
    fn reopening_an_existing_file_keeps_its_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.db");
        drop(open_database(&path).expect("create"));
        let conn = open_database(&path).expect("reopen");
        assert_eq!(current_schema_version(&conn).expect("version"), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn in_memory_databases_are_migrated() {
        let conn = open_in_memory().expect("open");
        assert_eq!(current_schema_version(&conn).expect("version"), LATEST_SCHEMA_VERSION);
    }
}
