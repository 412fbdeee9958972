use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blob::{Blob, BlobAccess};
use crate::error::{HistoryError, Result};
use crate::ot::{RangesData, StringFileData};

/// A file by reference: its content blob, the blob holding its comments and
/// tracked changes, and free-form metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub hash: String,
    #[serde(default)]
    pub byte_length: u64,
    #[serde(default)]
    pub string_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl FileRef {
    #[must_use]
    pub fn from_blob(blob: &Blob) -> Self {
        Self {
            hash: blob.hash.clone(),
            byte_length: blob.byte_length,
            string_length: blob.string_length,
            ranges_hash: None,
            metadata: None,
        }
    }

    #[must_use]
    pub const fn is_text(&self) -> bool {
        self.string_length.is_some()
    }

    /// Every blob this reference needs to be readable.
    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.hash.as_str()).chain(self.ranges_hash.as_deref())
    }
}

/// A file during replay: still a reference, or text loaded for editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum File {
    Stored(FileRef),
    Loaded {
        data: StringFileData,
        metadata: Option<Map<String, Value>>,
    },
}

impl File {
    #[must_use]
    pub const fn is_text(&self) -> bool {
        match self {
            Self::Stored(file) => file.is_text(),
            Self::Loaded { .. } => true,
        }
    }

    #[must_use]
    pub const fn metadata(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Stored(file) => file.metadata.as_ref(),
            Self::Loaded { metadata, .. } => metadata.as_ref(),
        }
    }

    pub fn set_metadata(&mut self, value: Map<String, Value>) {
        match self {
            Self::Stored(file) => file.metadata = Some(value),
            Self::Loaded { metadata, .. } => *metadata = Some(value),
        }
    }

    /// Load text content (and annotations) so operations can be applied.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidChange`] for binary files and blob
    /// errors when content cannot be read.
    pub fn text_mut(&mut self, blobs: &dyn BlobAccess) -> Result<&mut StringFileData> {
        if let Self::Stored(file) = self {
            let data = load_text(file, blobs)?;
            let metadata = file.metadata.take();
            *self = Self::Loaded { data, metadata };
        }
        match self {
            Self::Loaded { data, .. } => Ok(data),
            Self::Stored(file) => Err(HistoryError::BlobNotText {
                hash: file.hash.clone(),
            }),
        }
    }

    /// Text content with annotations, loading from blobs when needed.
    ///
    /// # Errors
    ///
    /// As [`Self::text_mut`].
    pub fn text(&self, blobs: &dyn BlobAccess) -> Result<StringFileData> {
        match self {
            Self::Stored(file) => load_text(file, blobs),
            Self::Loaded { data, .. } => Ok(data.clone()),
        }
    }

    /// Raw bytes of the file content.
    ///
    /// # Errors
    ///
    /// Returns blob errors when the content cannot be read.
    pub fn bytes(&self, blobs: &dyn BlobAccess) -> Result<Vec<u8>> {
        match self {
            Self::Stored(file) => blobs.read_blob(&file.hash),
            Self::Loaded { data, .. } => Ok(data.content().as_bytes().to_vec()),
        }
    }

    /// Write loaded content to blobs and return the resulting reference.
    ///
    /// # Errors
    ///
    /// Returns blob errors when content cannot be written.
    pub fn store(&self, blobs: &dyn BlobAccess) -> Result<FileRef> {
        match self {
            Self::Stored(file) => Ok(file.clone()),
            Self::Loaded { data, metadata } => {
                let mut file = store_text(data, blobs)?;
                file.metadata.clone_from(metadata);
                Ok(file)
            }
        }
    }
}

fn load_text(file: &FileRef, blobs: &dyn BlobAccess) -> Result<StringFileData> {
    if !file.is_text() {
        return Err(HistoryError::BlobNotText {
            hash: file.hash.clone(),
        });
    }
    let content = String::from_utf8(blobs.read_blob(&file.hash)?).map_err(|_| {
        HistoryError::BlobNotText {
            hash: file.hash.clone(),
        }
    })?;
    let ranges = match &file.ranges_hash {
        Some(hash) => serde_json::from_slice::<RangesData>(&blobs.read_blob(hash)?)?,
        None => RangesData::default(),
    };
    Ok(StringFileData::with_ranges(content, ranges))
}

/// Store a text file's content and, when present, its annotations.
///
/// # Errors
///
/// Returns blob errors when content cannot be written.
pub fn store_text(data: &StringFileData, blobs: &dyn BlobAccess) -> Result<FileRef> {
    let blob = blobs.write_blob(data.content().as_bytes())?;
    let mut file = FileRef::from_blob(&blob);
    let ranges = data.ranges();
    if !ranges.is_empty() {
        let ranges_blob = blobs.write_blob(&serde_json::to_vec(&ranges)?)?;
        file.ranges_hash = Some(ranges_blob.hash);
    }
    Ok(file)
}
