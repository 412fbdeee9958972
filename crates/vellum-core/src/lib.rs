//! vellum-core: chunked, content-addressed project history.
//!
//! # Conventions
//!
//! - **Errors**: [`HistoryError`] for library operations; `anyhow::Result`
//!   for opening databases and loading configuration.
//! - **Logging**: `tracing` macros with structured `project_id` / `chunk_id`
//!   / version fields.
//!
//! # Layout
//!
//! - [`ot`]: text operations and annotated text
//! - [`history`]: operations, changes, snapshots, chunks, origins
//! - [`blob`]: content-addressed file content
//! - [`store`]: SQLite chunk storage and migrations
//! - [`assembler`], [`writer`], [`restore`]: reading, appending, restoring

pub mod assembler;
pub mod blob;
pub mod config;
pub mod error;
pub mod history;
pub mod ot;
pub mod restore;
pub mod store;
pub mod timestamp;
pub mod writer;

use std::sync::Arc;

use anyhow::Context;
use rusqlite::Connection;

pub use assembler::HistoryAssembler;
pub use blob::{BlobStore, FsObjectStore, MemoryObjectStore, ObjectStore};
pub use config::HistoryConfig;
pub use error::{ErrorCode, HistoryError, Result};
pub use history::{Change, Operation, Origin, ProjectId, Snapshot};
pub use ot::TextOperation;
pub use restore::RestoreManager;
pub use store::{ChunkStore, CompactionReport};
pub use writer::{AppendOutcome, HistoryWriter};

/// One connection to a history database plus the object store holding blob
/// bytes. Each component is a cheap view borrowed from it.
pub struct History {
    conn: Connection,
    objects: Arc<dyn ObjectStore>,
    config: HistoryConfig,
}

impl History {
    /// Open the database and filesystem blob root named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if either cannot be opened.
    pub fn open(config: HistoryConfig) -> anyhow::Result<Self> {
        let conn = store::open_database(&config.storage.database_path)?;
        let objects = FsObjectStore::open(&config.storage.blob_root).with_context(|| {
            format!("open blob root {}", config.storage.blob_root.display())
        })?;
        Ok(Self::from_parts(conn, Arc::new(objects), config))
    }

    /// A private in-memory database and object store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory(config: HistoryConfig) -> anyhow::Result<Self> {
        Ok(Self::from_parts(
            store::open_in_memory()?,
            Arc::new(MemoryObjectStore::new()),
            config,
        ))
    }

    #[must_use]
    pub fn from_parts(conn: Connection, objects: Arc<dyn ObjectStore>, config: HistoryConfig) -> Self {
        Self {
            conn,
            objects,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &HistoryConfig {
        &self.config
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.objects)
    }

    #[must_use]
    pub fn blobs(&self) -> BlobStore<'_> {
        BlobStore::new(&self.conn, self.objects.as_ref())
    }

    #[must_use]
    pub const fn chunks(&self) -> ChunkStore<'_> {
        ChunkStore::new(&self.conn)
    }

    #[must_use]
    pub fn assembler(&self) -> HistoryAssembler<'_> {
        HistoryAssembler::new(self.chunks(), self.blobs())
    }

    #[must_use]
    pub fn writer(&self) -> HistoryWriter<'_> {
        HistoryWriter::new(self.chunks(), self.blobs(), &self.config)
    }

    #[must_use]
    pub fn restorer(&self) -> RestoreManager<'_> {
        RestoreManager::new(self.chunks(), self.blobs(), self.writer())
    }

    /// # Errors
    ///
    /// Returns [`HistoryError::Storage`] if the project cannot be created.
    pub fn create_project(&self) -> Result<ProjectId> {
        self.chunks().initialize_project()
    }

    /// Merge small closed chunks using the configured size-tiered policy.
    ///
    /// # Errors
    ///
    /// As [`ChunkStore::compact`].
    pub fn compact(&self, project_id: ProjectId) -> Result<Option<CompactionReport>> {
        self.chunks().compact(project_id, &self.config.compaction)
    }
}
