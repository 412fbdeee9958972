//! Blob metadata in SQLite over bytes in an [`ObjectStore`].
//!
//! Every write stores the object before its metadata row, so a row in `blobs`
//! always names content that can be read.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument};

use super::object_store::ObjectStore;
use super::{Blob, BlobAccess, hash};
use crate::error::{HistoryError, Result};
use crate::history::ProjectId;

#[derive(Clone, Copy)]
pub struct BlobStore<'a> {
    conn: &'a Connection,
    objects: &'a dyn ObjectStore,
}

impl<'a> BlobStore<'a> {
    #[must_use]
    pub const fn new(conn: &'a Connection, objects: &'a dyn ObjectStore) -> Self {
        Self { conn, objects }
    }

    /// Store `bytes` once; repeated puts of the same content return the same
    /// blob and leave a single copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the object or its metadata cannot be written.
    #[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
    pub fn put(&self, bytes: &[u8]) -> Result<Blob> {
        let blob = Blob::describe(bytes);
        if !self.objects.object_exists(&blob.hash)? {
            self.objects.put_object(&blob.hash, bytes)?;
        }
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO blobs (hash_bytes, byte_length, string_length, global)
             VALUES (?1, ?2, ?3, 0)",
            params![hash::decode(&blob.hash)?, blob.byte_length, blob.string_length],
        )?;
        if inserted > 0 {
            debug!(hash = %blob.hash, byte_length = blob.byte_length, "blob stored");
        }
        Ok(blob)
    }

    /// [`Self::put`] and associate the blob with `project`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object or either metadata row cannot be written.
    pub fn put_for_project(&self, project_id: ProjectId, bytes: &[u8]) -> Result<Blob> {
        let blob = self.put(bytes)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO project_blobs (project_id, hash_bytes, byte_length, string_length)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                project_id,
                hash::decode(&blob.hash)?,
                blob.byte_length,
                blob.string_length
            ],
        )?;
        Ok(blob)
    }

    /// # Errors
    ///
    /// Returns an error if the blob cannot be written.
    pub fn put_string(&self, text: &str) -> Result<Blob> {
        self.put(text.as_bytes())
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the blob written.
    pub fn put_file(&self, path: &Path) -> Result<Blob> {
        let bytes = std::fs::read(path)?;
        self.put(&bytes)
    }

    /// Content of a blob, verified against its hash.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::BlobNotFound`] for unknown or malformed hashes
    /// and [`HistoryError::BlobCorrupt`] when stored bytes do not match.
    /// Malformed hashes never reach the object store.
    pub fn get(&self, hash: &str) -> Result<Vec<u8>> {
        hash::decode(hash)?;
        let bytes = self
            .objects
            .get_object(hash)?
            .ok_or_else(|| HistoryError::BlobNotFound {
                hash: hash.to_string(),
            })?;
        hash::verify(hash, &bytes)?;
        Ok(bytes)
    }

    /// # Errors
    ///
    /// As [`Self::get`], plus [`HistoryError::BlobNotText`] when the content
    /// is not UTF-8.
    pub fn get_string(&self, hash: &str) -> Result<String> {
        String::from_utf8(self.get(hash)?).map_err(|_| HistoryError::BlobNotText {
            hash: hash.to_string(),
        })
    }

    /// Recorded metadata for a blob.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::BlobNotFound`] when no row exists.
    pub fn get_blob(&self, hash: &str) -> Result<Blob> {
        self.find_blob(hash)?
            .ok_or_else(|| HistoryError::BlobNotFound {
                hash: hash.to_string(),
            })
    }

    /// Metadata for several blobs; unknown hashes are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata query fails.
    pub fn get_blobs(&self, hashes: &[String]) -> Result<Vec<Blob>> {
        let mut found = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(blob) = self.find_blob(hash)? {
                found.push(blob);
            }
        }
        Ok(found)
    }

    /// # Errors
    ///
    /// Returns an error if the metadata query fails.
    pub fn exists(&self, hash: &str) -> Result<bool> {
        Ok(self.find_blob(hash)?.is_some())
    }

    /// Make a blob readable from every project.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::BlobNotFound`] when no row exists.
    pub fn promote_global(&self, hash: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE blobs SET global = 1 WHERE hash_bytes = ?1",
            [hash::decode(hash)?],
        )?;
        if updated == 0 {
            return Err(HistoryError::BlobNotFound {
                hash: hash.to_string(),
            });
        }
        Ok(())
    }

    /// True when the blob is global or associated with `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata query fails.
    pub fn is_visible(&self, project_id: ProjectId, hash: &str) -> Result<bool> {
        let key = hash::decode(hash)?;
        let visible: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM blobs WHERE hash_bytes = ?1 AND global = 1)
                 OR EXISTS(SELECT 1 FROM project_blobs WHERE project_id = ?2 AND hash_bytes = ?1)",
            params![key, project_id],
            |row| row.get(0),
        )?;
        Ok(visible)
    }

    /// Hashes associated with a project, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata query fails.
    pub fn project_blob_hashes(&self, project_id: ProjectId) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT hash_bytes FROM project_blobs WHERE project_id = ?1 ORDER BY hash_bytes",
        )?;
        let rows = stmt.query_map([project_id], |row| row.get::<_, Vec<u8>>(0))?;
        let mut hashes = Vec::new();
        for row in rows {
            hashes.push(hash::encode(&row?));
        }
        Ok(hashes)
    }

    fn find_blob(&self, hash: &str) -> Result<Option<Blob>> {
        let Ok(key) = hash::decode(hash) else {
            return Ok(None);
        };
        let row = self
            .conn
            .query_row(
                "SELECT byte_length, string_length FROM blobs WHERE hash_bytes = ?1",
                [key],
                |row| Ok((row.get::<_, u64>(0)?, row.get::<_, Option<u64>>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(byte_length, string_length)| Blob {
            hash: hash.to_string(),
            byte_length,
            string_length,
        }))
    }
}

impl BlobAccess for BlobStore<'_> {
    fn read_blob(&self, hash: &str) -> Result<Vec<u8>> {
        self.get(hash)
    }

    fn write_blob(&self, bytes: &[u8]) -> Result<Blob> {
        self.put(bytes)
    }
}
