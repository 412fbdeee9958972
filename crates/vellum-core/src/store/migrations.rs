//! Ordered schema upgrades keyed by `PRAGMA user_version`.

use super::schema;
use rusqlite::{Connection, types::Type};
use tracing::info;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial chunk, blob and project tables",
        sql: schema::MIGRATION_V1_SQL,
    },
    Migration {
        version: 2,
        name: "non-negative chunk versions",
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Schema version a fully migrated database reports.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

/// # Errors
///
/// Fails if the pragma cannot be read or holds a negative or oversized value.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(err)))
}

/// Bring `conn` up to [`LATEST_SCHEMA_VERSION`]. Each step commits on its own
/// together with the new `user_version`, so an interrupted upgrade resumes at
/// the first step that did not commit.
///
/// # Errors
///
/// Fails on the first step whose SQL is rejected.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let start = current_schema_version(conn)?;
    let mut reached = start;
    for step in MIGRATIONS.iter().filter(|m| m.version > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.execute(
            "UPDATE schema_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.commit()?;
        info!(version = step.version, step = step.name, "history schema upgraded");
        reached = step.version;
    }
    Ok(reached)
}
