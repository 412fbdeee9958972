use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::store::SizeTieredPolicy;

/// Environment variable overriding [`StorageConfig::database_path`].
pub const DATABASE_ENV: &str = "VELLUM_DB";
/// Environment variable overriding [`StorageConfig::blob_root`].
pub const BLOB_ROOT_ENV: &str = "VELLUM_BLOBS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub compaction: SizeTieredPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_blob_root")]
    pub blob_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            blob_root: default_blob_root(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// The open chunk is sealed once it holds this many changes.
    #[serde(default = "default_max_changes_per_chunk")]
    pub max_changes_per_chunk: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_changes_per_chunk: default_max_changes_per_chunk(),
        }
    }
}

/// Bounds for retrying appends that lost a race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): doubles each time.
    #[must_use]
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        self.base_backoff_ms
            .saturating_mul(1_u64 << attempt.saturating_sub(1).min(16))
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist, then apply environment overrides.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<HistoryConfig> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<HistoryConfig>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        HistoryConfig::default()
    };

    Ok(apply_env_overrides(
        config,
        env::var(DATABASE_ENV).ok(),
        env::var(BLOB_ROOT_ENV).ok(),
    ))
}

/// The default config file location: `<config dir>/vellum/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vellum").join("config.toml"))
}

fn apply_env_overrides(
    mut config: HistoryConfig,
    database: Option<String>,
    blobs: Option<String>,
) -> HistoryConfig {
    if let Some(path) = database.filter(|raw| !raw.trim().is_empty()) {
        config.storage.database_path = PathBuf::from(path);
    }
    if let Some(path) = blobs.filter(|raw| !raw.trim().is_empty()) {
        config.storage.blob_root = PathBuf::from(path);
    }
    config
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("vellum")
}

fn default_database_path() -> PathBuf {
    data_dir().join("history.sqlite3")
}

fn default_blob_root() -> PathBuf {
    data_dir().join("blobs")
}

const fn default_max_changes_per_chunk() -> u64 {
    100
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_backoff_ms() -> u64 {
    10
}
