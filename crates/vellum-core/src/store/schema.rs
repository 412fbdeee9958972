//! Canonical SQLite schema for project history.
//!
//! - `chunks` is the live partition of each project's versions; `doc_id` is
//!   the project id
//! - `pending_chunks` stages chunks assembled off to the side (compaction)
//! - `old_chunks` keeps retired chunk metadata
//! - `chunk_snapshots` / `chunk_changes` hold chunk contents keyed by chunk id,
//!   which is allocated from `chunk_ids` and survives staging and retirement
//! - `blobs` / `project_blobs` describe content held by the object store

/// Migration v1: projects, chunk tables, chunk contents and blob metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO schema_meta (id, schema_version) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunk_ids (
    id INTEGER PRIMARY KEY AUTOINCREMENT
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    doc_id INTEGER NOT NULL REFERENCES projects(id),
    start_version INTEGER NOT NULL,
    end_version INTEGER NOT NULL CHECK (end_version >= 0),
    end_timestamp TEXT,
    closed INTEGER NOT NULL DEFAULT 0 CHECK (closed IN (0, 1)),
    UNIQUE (doc_id, start_version)
);

CREATE TABLE IF NOT EXISTS pending_chunks (
    id INTEGER PRIMARY KEY,
    doc_id INTEGER NOT NULL REFERENCES projects(id),
    start_version INTEGER NOT NULL CHECK (start_version >= 0),
    end_version INTEGER NOT NULL CHECK (end_version >= start_version),
    end_timestamp TEXT
);

CREATE TABLE IF NOT EXISTS old_chunks (
    chunk_id INTEGER PRIMARY KEY,
    doc_id INTEGER NOT NULL,
    end_version INTEGER NOT NULL,
    end_timestamp TEXT,
    start_version INTEGER NOT NULL,
    deleted_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunk_snapshots (
    chunk_id INTEGER PRIMARY KEY,
    snapshot_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunk_changes (
    chunk_id INTEGER NOT NULL,
    version INTEGER NOT NULL,
    change_json TEXT NOT NULL,
    change_hash TEXT NOT NULL CHECK (change_hash LIKE 'blake3:%'),
    PRIMARY KEY (chunk_id, version)
);

CREATE TABLE IF NOT EXISTS blobs (
    hash_bytes BLOB PRIMARY KEY,
    byte_length INTEGER NOT NULL CHECK (byte_length >= 0),
    string_length INTEGER,
    global INTEGER NOT NULL DEFAULT 0 CHECK (global IN (0, 1))
);

CREATE TABLE IF NOT EXISTS project_blobs (
    project_id INTEGER NOT NULL,
    hash_bytes BLOB NOT NULL,
    byte_length INTEGER NOT NULL,
    string_length INTEGER,
    PRIMARY KEY (project_id, hash_bytes)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_one_open
    ON chunks(doc_id) WHERE closed = 0;

CREATE INDEX IF NOT EXISTS idx_chunks_doc_end
    ON chunks(doc_id, end_version);

CREATE INDEX IF NOT EXISTS idx_pending_chunks_doc
    ON pending_chunks(doc_id, start_version);

CREATE INDEX IF NOT EXISTS idx_old_chunks_doc
    ON old_chunks(doc_id, start_version);
";

/// Migration v2: rebuild `chunks` so negative start versions are rejected.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE chunks_v2 (
    id INTEGER PRIMARY KEY,
    doc_id INTEGER NOT NULL REFERENCES projects(id),
    start_version INTEGER NOT NULL CHECK (start_version >= 0),
    end_version INTEGER NOT NULL CHECK (end_version >= 0),
    end_timestamp TEXT,
    closed INTEGER NOT NULL DEFAULT 0 CHECK (closed IN (0, 1)),
    UNIQUE (doc_id, start_version),
    CHECK (start_version <= end_version)
);

INSERT INTO chunks_v2 (id, doc_id, start_version, end_version, end_timestamp, closed)
SELECT id, doc_id, start_version, end_version, end_timestamp, closed FROM chunks;

DROP TABLE chunks;
ALTER TABLE chunks_v2 RENAME TO chunks;

CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_one_open
    ON chunks(doc_id) WHERE closed = 0;

CREATE INDEX IF NOT EXISTS idx_chunks_doc_end
    ON chunks(doc_id, end_version);
";

/// Indexes every migrated database must carry.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_chunks_one_open",
    "idx_chunks_doc_end",
    "idx_pending_chunks_doc",
    "idx_old_chunks_doc",
];
