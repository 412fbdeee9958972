//! Chunk metadata and contents over SQLite.
//!
//! # Concurrency
//!
//! Every mutation runs in one `BEGIN IMMEDIATE` transaction, so writers on
//! separate connections (or processes) are serialized by SQLite's write
//! lock. Appends are compare-and-set on the open chunk's end version, and the
//! unique `(doc_id, start_version)` key plus the single-open-chunk index
//! reject any seal or promotion that would break the partition. Constraint
//! violations surface as [`HistoryError::VersionConflict`].
//!
//! Reads use a deferred transaction so a chunk row and its change rows come
//! from one view; change rows above the observed end version are ignored.

use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params,
    types::Type,
};
use tracing::{debug, info, instrument, warn};

use super::compaction::{CompactionPolicy, CompactionReport};
use super::partition;
use crate::blob::hash;
use crate::error::{HistoryError, Result};
use crate::history::{
    Change, Chunk, ChunkId, ChunkRecord, OldChunk, PendingChunk, ProjectId, SealedChunk,
    SnapshotRecord,
};
use crate::timestamp;

const CHUNK_COLUMNS: &str = "id, doc_id, start_version, end_version, end_timestamp, closed";

#[derive(Clone, Copy)]
pub struct ChunkStore<'a> {
    conn: &'a Connection,
}

impl<'a> ChunkStore<'a> {
    #[must_use]
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Create a project with an open chunk `[0, 0]` over an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Storage`] if the rows cannot be written.
    pub fn initialize_project(&self) -> Result<ProjectId> {
        let tx = self.begin_write()?;
        tx.execute(
            "INSERT INTO projects (created_at) VALUES (?1)",
            [timestamp::format(&timestamp::now())],
        )?;
        let project_id = tx.last_insert_rowid();
        let chunk_id = allocate_chunk_id(&tx)?;
        tx.execute(
            "INSERT INTO chunks (id, doc_id, start_version, end_version, closed)
             VALUES (?1, ?2, 0, 0, 0)",
            params![chunk_id, project_id],
        )?;
        put_snapshot(&tx, chunk_id, &SnapshotRecord::default())?;
        tx.commit()?;
        info!(project_id, chunk_id, "project initialized");
        Ok(project_id)
    }

    /// Append `changes` to the open chunk, which must currently end at
    /// `expected_end_version`. Returns the new end version.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::VersionConflict`] if another writer moved the tip
    /// - [`HistoryError::MissingBlob`] if a change references unstored content
    /// - [`HistoryError::ProjectNotFound`] for unknown projects
    #[instrument(level = "debug", skip(self, changes), fields(changes = changes.len()))]
    pub fn append_to_pending(
        &self,
        project_id: ProjectId,
        expected_end_version: u64,
        changes: &[Change],
    ) -> Result<u64> {
        let tx = self.begin_write()?;
        let open = open_chunk(&tx, project_id)?;
        if open.end_version != expected_end_version {
            warn!(
                project_id,
                expected = expected_end_version,
                actual = open.end_version,
                "append rejected: stale tip"
            );
            return Err(HistoryError::VersionConflict {
                expected: expected_end_version,
                actual: open.end_version,
            });
        }
        if changes.is_empty() {
            return Ok(expected_end_version);
        }

        for change in changes {
            for hash in change.blob_hashes() {
                associate_blob(&tx, project_id, hash)?;
            }
        }
        let new_end = put_changes(&tx, open.id, expected_end_version, changes)
            .map_err(|e| conflict_on_constraint(e, expected_end_version))?;

        let updated = tx.execute(
            "UPDATE chunks SET end_version = ?1
             WHERE id = ?2 AND end_version = ?3 AND closed = 0",
            params![new_end, open.id, expected_end_version],
        )?;
        if updated != 1 {
            return Err(HistoryError::VersionConflict {
                expected: expected_end_version,
                actual: open.end_version,
            });
        }
        tx.commit()?;
        debug!(project_id, chunk_id = open.id, new_end, "changes appended");
        Ok(new_end)
    }

    /// Close the open chunk `chunk_id` (which must end at
    /// `expected_end_version`) and open its successor over `end_snapshot`,
    /// the project state at that version. Both happen or neither does.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::VersionConflict`] if the chunk was sealed or extended
    ///   by someone else
    /// - [`HistoryError::EmptyChunk`] if the chunk holds no changes
    /// - [`HistoryError::MissingBlob`] if the snapshot references unstored
    ///   content
    #[instrument(level = "debug", skip(self, end_snapshot))]
    pub fn seal_chunk(
        &self,
        project_id: ProjectId,
        chunk_id: ChunkId,
        expected_end_version: u64,
        end_snapshot: &SnapshotRecord,
    ) -> Result<SealedChunk> {
        let tx = self.begin_write()?;
        let open = open_chunk(&tx, project_id)?;
        if open.id != chunk_id || open.end_version != expected_end_version {
            if open.id != chunk_id && live_chunk(&tx, chunk_id)?.is_none() {
                return Err(HistoryError::ChunkNotFound(chunk_id));
            }
            warn!(project_id, chunk_id, open_id = open.id, "seal rejected: tip moved");
            return Err(HistoryError::VersionConflict {
                expected: expected_end_version,
                actual: open.end_version,
            });
        }
        if open.change_count() == 0 {
            return Err(HistoryError::EmptyChunk(chunk_id));
        }
        for hash in end_snapshot.blob_hashes() {
            associate_blob(&tx, project_id, hash)?;
        }

        let end_timestamp = change_at(&tx, chunk_id, open.end_version)?.timestamp;
        tx.execute(
            "UPDATE chunks SET closed = 1, end_timestamp = ?1
             WHERE id = ?2 AND closed = 0 AND end_version = ?3",
            params![timestamp::format(&end_timestamp), chunk_id, expected_end_version],
        )?;

        let open_id = allocate_chunk_id(&tx)?;
        tx.execute(
            "INSERT INTO chunks (id, doc_id, start_version, end_version, closed)
             VALUES (?1, ?2, ?3, ?3, 0)",
            params![open_id, project_id, open.end_version],
        )
        .map_err(|e| conflict_on_constraint(e.into(), expected_end_version))?;
        put_snapshot(&tx, open_id, end_snapshot)?;

        partition::check(project_id, &live_chunks(&tx, project_id)?)?;
        tx.commit()?;
        info!(
            project_id,
            closed_id = chunk_id,
            open_id,
            end_version = open.end_version,
            "chunk sealed"
        );
        Ok(SealedChunk {
            closed_id: chunk_id,
            open_id,
        })
    }

    /// Write a chunk outside the live partition: `snapshot` is the project
    /// state at `start_version` and `changes` produce the versions after it.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::MissingBlob`] for unstored content and
    /// [`HistoryError::InvalidChange`] for an empty change list.
    pub fn stage_chunk(
        &self,
        project_id: ProjectId,
        start_version: u64,
        snapshot: &SnapshotRecord,
        changes: &[Change],
    ) -> Result<PendingChunk> {
        let Some(last) = changes.last() else {
            return Err(HistoryError::InvalidChange(
                "a staged chunk needs at least one change".into(),
            ));
        };
        let tx = self.begin_write()?;
        ensure_project(&tx, project_id)?;
        for hash in snapshot
            .blob_hashes()
            .chain(changes.iter().flat_map(Change::blob_hashes))
        {
            associate_blob(&tx, project_id, hash)?;
        }

        let id = allocate_chunk_id(&tx)?;
        put_snapshot(&tx, id, snapshot)?;
        let end_version = put_changes(&tx, id, start_version, changes)?;
        tx.execute(
            "INSERT INTO pending_chunks (id, doc_id, start_version, end_version, end_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                project_id,
                start_version,
                end_version,
                timestamp::format(&last.timestamp)
            ],
        )?;
        tx.commit()?;
        debug!(project_id, chunk_id = id, start_version, end_version, "chunk staged");
        Ok(PendingChunk {
            id,
            project_id,
            start_version,
            end_version,
            end_timestamp: Some(last.timestamp),
        })
    }

    /// Retire closed chunk `chunk_id`, promoting the staged chunk that covers
    /// exactly the same range in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::ChunkNotFound`] if the chunk is not live
    /// - [`HistoryError::ChunkStillOpen`] for the open chunk
    /// - [`HistoryError::NoReplacement`] if nothing is staged for its range
    pub fn retire_chunk(&self, chunk_id: ChunkId) -> Result<OldChunk> {
        let tx = self.begin_write()?;
        let chunk = live_chunk(&tx, chunk_id)?.ok_or(HistoryError::ChunkNotFound(chunk_id))?;
        if !chunk.closed {
            return Err(HistoryError::ChunkStillOpen(chunk_id));
        }
        let replacement = staged_for_range(
            &tx,
            chunk.project_id,
            chunk.start_version,
            chunk.end_version,
        )?
        .ok_or(HistoryError::NoReplacement(chunk_id))?;

        let mut retired = replace_run(&tx, &[chunk], &replacement)?;
        tx.commit()?;
        retired.pop().ok_or(HistoryError::ChunkNotFound(chunk_id))
    }

    /// Merge the run of closed chunks chosen by `policy`. Returns `None` when
    /// the policy selects nothing.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionConflict`] if the run changed while the
    /// merged chunk was being staged, and load errors for corrupt chunks.
    #[instrument(level = "debug", skip(self, policy))]
    pub fn compact(
        &self,
        project_id: ProjectId,
        policy: &dyn CompactionPolicy,
    ) -> Result<Option<CompactionReport>> {
        let closed: Vec<ChunkRecord> = self
            .list_chunks(project_id)?
            .into_iter()
            .filter(|chunk| chunk.closed)
            .collect();
        let Some(range) = policy.select_run(&closed) else {
            return Ok(None);
        };
        let Some(run) = closed.get(range.clone()) else {
            warn!(
                project_id,
                ?range,
                closed = closed.len(),
                "compaction policy selected no valid run"
            );
            return Ok(None);
        };
        let (Some(first), Some(last)) = (run.first(), run.last()) else {
            return Ok(None);
        };

        let mut changes = Vec::new();
        let mut snapshot = None;
        for record in run {
            let chunk = self.load_chunk(record.id)?;
            snapshot.get_or_insert(chunk.snapshot);
            changes.extend(chunk.changes);
        }
        let staged = self.stage_chunk(
            project_id,
            first.start_version,
            &snapshot.unwrap_or_default(),
            &changes,
        )?;

        let tx = self.begin_write()?;
        let current: Vec<ChunkRecord> = live_chunks(&tx, project_id)?
            .into_iter()
            .filter(|chunk| {
                chunk.closed
                    && chunk.start_version >= first.start_version
                    && chunk.end_version <= last.end_version
            })
            .collect();
        if current != run {
            return Err(HistoryError::VersionConflict {
                expected: last.end_version,
                actual: current.last().map_or(0, |chunk| chunk.end_version),
            });
        }
        let retired = replace_run(&tx, run, &staged)?;
        tx.commit()?;

        let report = CompactionReport {
            promoted: promoted_record(&staged),
            retired,
            changes_merged: staged.end_version - staged.start_version,
        };
        info!(
            project_id,
            promoted = staged.id,
            retired = report.retired.len(),
            changes = report.changes_merged,
            "chunks compacted"
        );
        Ok(Some(report))
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The live chunk serving `version`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] beyond the tip.
    pub fn find_chunk_for_version(&self, project_id: ProjectId, version: u64) -> Result<ChunkRecord> {
        let tx = self.begin_read()?;
        find_chunk(&tx, project_id, version)
    }

    /// # Errors
    ///
    /// Returns [`HistoryError::ProjectNotFound`] for unknown projects.
    pub fn latest_version(&self, project_id: ProjectId) -> Result<u64> {
        let tx = self.begin_read()?;
        Ok(open_chunk(&tx, project_id)?.end_version)
    }

    /// A live chunk with its snapshot and changes.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::ChunkNotFound`] for ids not in the live
    /// partition and [`HistoryError::CorruptChange`] for damaged rows.
    pub fn load_chunk(&self, chunk_id: ChunkId) -> Result<Chunk> {
        let tx = self.begin_read()?;
        let record = live_chunk(&tx, chunk_id)?.ok_or(HistoryError::ChunkNotFound(chunk_id))?;
        load_contents(&tx, record)
    }

    /// # Errors
    ///
    /// Returns [`HistoryError::ProjectNotFound`] for unknown projects.
    pub fn load_latest(&self, project_id: ProjectId) -> Result<Chunk> {
        let tx = self.begin_read()?;
        let record = open_chunk(&tx, project_id)?;
        load_contents(&tx, record)
    }

    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] beyond the tip.
    pub fn load_at_version(&self, project_id: ProjectId, version: u64) -> Result<Chunk> {
        let tx = self.begin_read()?;
        let record = find_chunk(&tx, project_id, version)?;
        load_contents(&tx, record)
    }

    /// The first closed chunk whose last change is at or after `ts`, else the
    /// open chunk.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::ProjectNotFound`] for unknown projects.
    pub fn load_at_timestamp(&self, project_id: ProjectId, ts: DateTime<Utc>) -> Result<Chunk> {
        let tx = self.begin_read()?;
        let found = tx
            .query_row(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks
                     WHERE doc_id = ?1 AND closed = 1 AND end_timestamp >= ?2
                     ORDER BY start_version LIMIT 1"
                ),
                params![project_id, timestamp::format(&ts)],
                chunk_from_row,
            )
            .optional()?;
        let record = match found {
            Some(record) => record,
            None => open_chunk(&tx, project_id)?,
        };
        load_contents(&tx, record)
    }

    /// Changes producing versions `from + 1 ..= to`, across chunks.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] if `to` is beyond the tip.
    pub fn load_changes(&self, project_id: ProjectId, from: u64, to: u64) -> Result<Vec<Change>> {
        let tx = self.begin_read()?;
        let latest = open_chunk(&tx, project_id)?.end_version;
        if to > latest {
            return Err(HistoryError::VersionNotFound {
                requested: to,
                latest,
            });
        }
        let mut changes = Vec::new();
        for chunk in live_chunks(&tx, project_id)? {
            if chunk.end_version <= from || chunk.start_version >= to {
                continue;
            }
            let low = from.max(chunk.start_version);
            let high = to.min(chunk.end_version);
            changes.extend(load_change_rows(&tx, chunk.id, low, high)?);
        }
        Ok(changes)
    }

    /// When `version` was recorded: the timestamp of the change producing it,
    /// or the project's creation time for version 0.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::VersionNotFound`] beyond the tip.
    pub fn version_timestamp(&self, project_id: ProjectId, version: u64) -> Result<DateTime<Utc>> {
        let tx = self.begin_read()?;
        if version == 0 {
            return project_created_at(&tx, project_id);
        }
        let latest = open_chunk(&tx, project_id)?.end_version;
        if version > latest {
            return Err(HistoryError::VersionNotFound {
                requested: version,
                latest,
            });
        }
        let chunk_id: ChunkId = tx.query_row(
            "SELECT id FROM chunks
             WHERE doc_id = ?1 AND start_version < ?2 AND end_version >= ?2",
            params![project_id, version],
            |row| row.get(0),
        )?;
        Ok(change_at(&tx, chunk_id, version)?.timestamp)
    }

    /// Live chunks ordered by start version.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Storage`] if the query fails.
    pub fn list_chunks(&self, project_id: ProjectId) -> Result<Vec<ChunkRecord>> {
        let tx = self.begin_read()?;
        live_chunks(&tx, project_id)
    }

    /// Staged chunks not yet promoted.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Storage`] if the query fails.
    pub fn list_pending_chunks(&self, project_id: ProjectId) -> Result<Vec<PendingChunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, doc_id, start_version, end_version, end_timestamp
             FROM pending_chunks WHERE doc_id = ?1 ORDER BY start_version, id",
        )?;
        let rows = stmt.query_map([project_id], pending_from_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Retired chunks, oldest retirement first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Storage`] if the query fails.
    pub fn list_old_chunks(&self, project_id: ProjectId) -> Result<Vec<OldChunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_id, doc_id, start_version, end_version, end_timestamp, deleted_at
             FROM old_chunks WHERE doc_id = ?1 ORDER BY deleted_at, chunk_id",
        )?;
        let rows = stmt.query_map([project_id], |row| {
            Ok(OldChunk {
                chunk_id: row.get(0)?,
                project_id: row.get(1)?,
                start_version: row.get(2)?,
                end_version: row.get(3)?,
                end_timestamp: optional_ts(row, 4)?,
                deleted_at: required_ts(row, 5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// # Errors
    ///
    /// Returns [`HistoryError::PartitionViolation`] if the live chunks do not
    /// tile `[0, latest]`.
    pub fn validate_partition(&self, project_id: ProjectId) -> Result<()> {
        let tx = self.begin_read()?;
        ensure_project(&tx, project_id)?;
        partition::check(project_id, &live_chunks(&tx, project_id)?)
    }

    /// # Errors
    ///
    /// Returns [`HistoryError::ProjectNotFound`] for unknown projects.
    pub fn project_created_at(&self, project_id: ProjectId) -> Result<DateTime<Utc>> {
        project_created_at(self.conn, project_id)
    }

    fn begin_write(&self) -> Result<Transaction<'a>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn begin_read(&self) -> Result<Transaction<'a>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Deferred,
        )?)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        start_version: row.get(2)?,
        end_version: row.get(3)?,
        end_timestamp: optional_ts(row, 4)?,
        closed: row.get(5)?,
    })
}

fn pending_from_row(row: &Row<'_>) -> rusqlite::Result<PendingChunk> {
    Ok(PendingChunk {
        id: row.get(0)?,
        project_id: row.get(1)?,
        start_version: row.get(2)?,
        end_version: row.get(3)?,
        end_timestamp: optional_ts(row, 4)?,
    })
}

fn optional_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| {
            timestamp::parse(&raw).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error))
            })
        })
        .transpose()
}

fn required_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    optional_ts(row, idx)?.ok_or(rusqlite::Error::InvalidColumnType(
        idx,
        "timestamp".into(),
        Type::Null,
    ))
}

/// Digest stored next to each change row and checked on load.
fn change_digest(json: &str) -> String {
    format!("blake3:{}", blake3::hash(json.as_bytes()).to_hex())
}

fn conflict_on_constraint(error: HistoryError, expected: u64) -> HistoryError {
    match error {
        HistoryError::Storage(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            HistoryError::VersionConflict {
                expected,
                actual: expected + 1,
            }
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Transaction-scoped queries
// ---------------------------------------------------------------------------

fn ensure_project(conn: &Connection, project_id: ProjectId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1)",
        [project_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(HistoryError::ProjectNotFound(project_id))
    }
}

fn project_created_at(conn: &Connection, project_id: ProjectId) -> Result<DateTime<Utc>> {
    conn.query_row(
        "SELECT created_at FROM projects WHERE id = ?1",
        [project_id],
        |row| required_ts(row, 0),
    )
    .optional()?
    .ok_or(HistoryError::ProjectNotFound(project_id))
}

fn open_chunk(conn: &Connection, project_id: ProjectId) -> Result<ChunkRecord> {
    let found = conn
        .query_row(
            &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE doc_id = ?1 AND closed = 0"),
            [project_id],
            chunk_from_row,
        )
        .optional()?;
    match found {
        Some(chunk) => Ok(chunk),
        None => {
            ensure_project(conn, project_id)?;
            Err(HistoryError::PartitionViolation {
                project_id,
                detail: "no open chunk".into(),
            })
        }
    }
}

fn live_chunk(conn: &Connection, chunk_id: ChunkId) -> Result<Option<ChunkRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1"),
            [chunk_id],
            chunk_from_row,
        )
        .optional()?)
}

fn live_chunks(conn: &Connection, project_id: ProjectId) -> Result<Vec<ChunkRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHUNK_COLUMNS} FROM chunks WHERE doc_id = ?1 ORDER BY start_version"
    ))?;
    let rows = stmt.query_map([project_id], chunk_from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn find_chunk(conn: &Connection, project_id: ProjectId, version: u64) -> Result<ChunkRecord> {
    let latest = open_chunk(conn, project_id)?.end_version;
    if version > latest {
        return Err(HistoryError::VersionNotFound {
            requested: version,
            latest,
        });
    }
    conn.query_row(
        &format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks
             WHERE doc_id = ?1 AND start_version <= ?2 AND (end_version > ?2 OR closed = 0)
             ORDER BY start_version DESC LIMIT 1"
        ),
        params![project_id, version],
        chunk_from_row,
    )
    .optional()?
    .ok_or_else(|| HistoryError::PartitionViolation {
        project_id,
        detail: format!("no chunk serves version {version}"),
    })
}

fn staged_for_range(
    conn: &Connection,
    project_id: ProjectId,
    start_version: u64,
    end_version: u64,
) -> Result<Option<PendingChunk>> {
    Ok(conn
        .query_row(
            "SELECT id, doc_id, start_version, end_version, end_timestamp
             FROM pending_chunks
             WHERE doc_id = ?1 AND start_version = ?2 AND end_version = ?3
             ORDER BY id DESC LIMIT 1",
            params![project_id, start_version, end_version],
            pending_from_row,
        )
        .optional()?)
}

fn allocate_chunk_id(conn: &Connection) -> Result<ChunkId> {
    conn.execute("INSERT INTO chunk_ids DEFAULT VALUES", [])?;
    Ok(conn.last_insert_rowid())
}

/// Record that `project_id` uses blob `hash`, which must already be stored.
fn associate_blob(conn: &Connection, project_id: ProjectId, hash: &str) -> Result<()> {
    let missing = || HistoryError::MissingBlob {
        hash: hash.to_string(),
    };
    let key = hash::decode(hash).map_err(|_| missing())?;
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM blobs WHERE hash_bytes = ?1)",
        [&key],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(missing());
    }
    conn.execute(
        "INSERT OR IGNORE INTO project_blobs (project_id, hash_bytes, byte_length, string_length)
         SELECT ?1, hash_bytes, byte_length, string_length FROM blobs WHERE hash_bytes = ?2",
        params![project_id, key],
    )?;
    Ok(())
}

fn put_snapshot(conn: &Connection, chunk_id: ChunkId, snapshot: &SnapshotRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO chunk_snapshots (chunk_id, snapshot_json) VALUES (?1, ?2)",
        params![chunk_id, serde_json::to_string(snapshot)?],
    )?;
    Ok(())
}

/// Insert `changes` as versions `after + 1 ..`; returns the last version.
fn put_changes(conn: &Connection, chunk_id: ChunkId, after: u64, changes: &[Change]) -> Result<u64> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO chunk_changes (chunk_id, version, change_json, change_hash)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut version = after;
    for change in changes {
        version += 1;
        let json = serde_json::to_string(change)?;
        let digest = change_digest(&json);
        stmt.execute(params![chunk_id, version, json, digest])?;
    }
    Ok(version)
}

fn decode_change(chunk_id: ChunkId, version: u64, json: &str, digest: &str) -> Result<Change> {
    if change_digest(json) != digest {
        return Err(HistoryError::CorruptChange { chunk_id, version });
    }
    serde_json::from_str(json).map_err(|_| HistoryError::CorruptChange { chunk_id, version })
}

fn change_at(conn: &Connection, chunk_id: ChunkId, version: u64) -> Result<Change> {
    let (json, digest): (String, String) = conn
        .query_row(
            "SELECT change_json, change_hash FROM chunk_changes
             WHERE chunk_id = ?1 AND version = ?2",
            params![chunk_id, version],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(HistoryError::CorruptChange { chunk_id, version })?;
    decode_change(chunk_id, version, &json, &digest)
}

/// Changes of `chunk_id` producing versions `after + 1 ..= through`, all of
/// which must be present.
fn load_change_rows(
    conn: &Connection,
    chunk_id: ChunkId,
    after: u64,
    through: u64,
) -> Result<Vec<Change>> {
    let mut stmt = conn.prepare_cached(
        "SELECT version, change_json, change_hash FROM chunk_changes
         WHERE chunk_id = ?1 AND version > ?2 AND version <= ?3
         ORDER BY version",
    )?;
    let rows = stmt.query_map(params![chunk_id, after, through], |row| {
        Ok((
            row.get::<_, u64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut changes = Vec::new();
    let mut expected = after + 1;
    for row in rows {
        let (version, json, digest) = row?;
        if version != expected {
            return Err(HistoryError::CorruptChange {
                chunk_id,
                version: expected,
            });
        }
        changes.push(decode_change(chunk_id, version, &json, &digest)?);
        expected += 1;
    }
    if expected != through + 1 {
        return Err(HistoryError::CorruptChange {
            chunk_id,
            version: expected,
        });
    }
    Ok(changes)
}

fn load_contents(conn: &Connection, record: ChunkRecord) -> Result<Chunk> {
    let snapshot_json: String = conn
        .query_row(
            "SELECT snapshot_json FROM chunk_snapshots WHERE chunk_id = ?1",
            [record.id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(HistoryError::ChunkNotFound(record.id))?;
    let snapshot = serde_json::from_str(&snapshot_json)?;
    let changes = load_change_rows(conn, record.id, record.start_version, record.end_version)?;
    Ok(Chunk {
        record,
        snapshot,
        changes,
    })
}

const fn promoted_record(staged: &PendingChunk) -> ChunkRecord {
    ChunkRecord {
        id: staged.id,
        project_id: staged.project_id,
        start_version: staged.start_version,
        end_version: staged.end_version,
        end_timestamp: staged.end_timestamp,
        closed: true,
    }
}

/// Move `run` to `old_chunks` and promote `staged` in its place, then check
/// the partition. Runs inside the caller's transaction.
fn replace_run(
    tx: &Transaction<'_>,
    run: &[ChunkRecord],
    staged: &PendingChunk,
) -> Result<Vec<OldChunk>> {
    let deleted_at = timestamp::now();
    let mut retired = Vec::with_capacity(run.len());
    for chunk in run {
        tx.execute(
            "INSERT INTO old_chunks
                 (chunk_id, doc_id, end_version, end_timestamp, start_version, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chunk.id,
                chunk.project_id,
                chunk.end_version,
                chunk.end_timestamp.as_ref().map(timestamp::format),
                chunk.start_version,
                timestamp::format(&deleted_at)
            ],
        )?;
        tx.execute("DELETE FROM chunks WHERE id = ?1", [chunk.id])?;
        retired.push(OldChunk {
            chunk_id: chunk.id,
            project_id: chunk.project_id,
            start_version: chunk.start_version,
            end_version: chunk.end_version,
            end_timestamp: chunk.end_timestamp,
            deleted_at,
        });
    }

    tx.execute(
        "INSERT INTO chunks (id, doc_id, start_version, end_version, end_timestamp, closed)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![
            staged.id,
            staged.project_id,
            staged.start_version,
            staged.end_version,
            staged.end_timestamp.as_ref().map(timestamp::format)
        ],
    )
    .map_err(|e| conflict_on_constraint(e.into(), staged.end_version))?;
    tx.execute("DELETE FROM pending_chunks WHERE id = ?1", [staged.id])?;

    partition::check(staged.project_id, &live_chunks(tx, staged.project_id)?)?;
    info!(
        project_id = staged.project_id,
        promoted = staged.id,
        retired = retired.len(),
        "staged chunk promoted"
    );
    Ok(retired)
}
