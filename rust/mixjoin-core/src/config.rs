// rust/mixjoin-core/src/config.rs

//! Configuration for the mixed join loader.
//!
//! All paths and tuning knobs are carried by one [`MixjoinConfig`] value that
//! is handed to [`crate::MixedDataModule`] at construction. It can be parsed
//! from TOML, overridden through `MIXJOIN_*` environment variables, and is
//! validated before use.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, RuntimeError};

// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MixjoinConfig {
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub shards: ShardConfig,
    pub loader: LoaderConfig,
    pub storage: StorageConfig,
}

/// Locations of the two data sources and of the materialized keyed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Parquet file holding the tabular metadata.
    pub table_path: PathBuf,
    /// Directory holding `index.json` and the shard files.
    pub shard_dir: PathBuf,
    /// SQLite file the ETL step materializes the table into.
    pub store_path: PathBuf,
}

/// What the ETL step does when the target table already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EtlMode {
    /// Leave an existing table untouched.
    #[default]
    CreateIfAbsent,
    /// Drop and rebuild the table.
    Overwrite,
}

// Keyed store layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    // Table name inside the SQLite file.
    pub table: String,
    // Unique key column, also the join field of shard records.
    pub key_column: String,
    // Name of the unique index on the key column.
    pub index_name: String,
    pub etl_mode: EtlMode,
    // Rows per Arrow record batch read from Parquet.
    pub etl_batch_rows: usize,
}

/// Shard file compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Lz4,
    #[default]
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// File name suffix for shards written with this compression.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "jsonl",
            Self::Lz4 => "jsonl.lz4",
            Self::Zstd => "jsonl.zst",
        }
    }
}

impl FromStr for Compression {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(RuntimeError::config(format!(
                "unknown shard compression '{other}', expected one of: none, lz4, zstd"
            ))),
        }
    }
}

// Shard writing and reading options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub compression: Compression,
    // zstd level; ignored for other algorithms.
    pub compression_level: i32,
    // Raw bytes per shard before rolling over to the next file.
    pub size_limit: usize,
    // Check each shard's xxhash64 against the index before decoding.
    pub verify_checksums: bool,
}

/// Batching and worker options for the train loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Records per batch.
    pub batch_size: usize,
    /// Worker threads; 0 runs the join inline in the consumer thread.
    pub num_workers: usize,
    /// Batches each worker may buffer ahead of the consumer.
    pub prefetch_batches: usize,
}

// Local storage tuning for shard files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to memory-map large shard files.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            table_path: PathBuf::from("df.parquet"),
            shard_dir: PathBuf::from("data"),
            store_path: PathBuf::from("data.sqlite"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: "dataset".to_string(),
            key_column: "id".to_string(),
            index_name: "dataset_index".to_string(),
            etl_mode: EtlMode::CreateIfAbsent,
            etl_batch_rows: 8192,
        }
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Zstd,
            compression_level: 3,
            size_limit: 5 * 1024, // 5 KB
            verify_checksums: true,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            num_workers: 2,
            prefetch_batches: 2,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

impl FromStr for MixjoinConfig {
    type Err = RuntimeError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| RuntimeError::config_with_source("failed to parse TOML config", e))
    }
}

impl MixjoinConfig {
    // Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `MIXJOIN_` followed by the section and the
    // field, e.g. `MIXJOIN_LOADER_BATCH_SIZE` overrides `loader.batch_size`.
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Source overrides
        if let Ok(val) = std::env::var("MIXJOIN_SOURCE_TABLE_PATH") {
            self.source.table_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("MIXJOIN_SOURCE_SHARD_DIR") {
            self.source.shard_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("MIXJOIN_SOURCE_STORE_PATH") {
            self.source.store_path = PathBuf::from(val);
        }

        // Store overrides
        if let Ok(val) = std::env::var("MIXJOIN_STORE_TABLE") {
            self.store.table = val;
        }
        if let Ok(val) = std::env::var("MIXJOIN_STORE_KEY_COLUMN") {
            self.store.key_column = val;
        }
        if let Ok(val) = std::env::var("MIXJOIN_STORE_ETL_MODE") {
            match val.to_lowercase().as_str() {
                "create_if_absent" => self.store.etl_mode = EtlMode::CreateIfAbsent,
                "overwrite" => self.store.etl_mode = EtlMode::Overwrite,
                _ => {}
            }
        }

        // Shard overrides
        if let Ok(val) = std::env::var("MIXJOIN_SHARDS_COMPRESSION") {
            if let Ok(v) = val.parse() {
                self.shards.compression = v;
            }
        }
        if let Ok(val) = std::env::var("MIXJOIN_SHARDS_SIZE_LIMIT") {
            if let Ok(v) = val.parse() {
                self.shards.size_limit = v;
            }
        }
        if let Ok(val) = std::env::var("MIXJOIN_SHARDS_VERIFY_CHECKSUMS") {
            if let Ok(v) = val.parse() {
                self.shards.verify_checksums = v;
            }
        }

        // Loader overrides
        if let Ok(val) = std::env::var("MIXJOIN_LOADER_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.loader.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("MIXJOIN_LOADER_NUM_WORKERS") {
            if let Ok(v) = val.parse() {
                self.loader.num_workers = v;
            }
        }
        if let Ok(val) = std::env::var("MIXJOIN_LOADER_PREFETCH_BATCHES") {
            if let Ok(v) = val.parse() {
                self.loader.prefetch_batches = v;
            }
        }

        // Storage overrides
        if let Ok(val) = std::env::var("MIXJOIN_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("MIXJOIN_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }

        self
    }

    // Validate all configuration values.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("store.table", &self.store.table)?;
        validate_identifier("store.key_column", &self.store.key_column)?;
        validate_identifier("store.index_name", &self.store.index_name)?;

        if self.store.etl_batch_rows == 0 {
            return Err(RuntimeError::config(
                "store.etl_batch_rows must be greater than 0",
            ));
        }

        if self.shards.size_limit == 0 {
            return Err(RuntimeError::config(
                "shards.size_limit must be greater than 0",
            ));
        }
        if self.shards.compression == Compression::Zstd
            && !(1..=22).contains(&self.shards.compression_level)
        {
            return Err(RuntimeError::config(
                "shards.compression_level must be between 1 and 22 for zstd",
            ));
        }

        if self.loader.batch_size == 0 {
            return Err(RuntimeError::config(
                "loader.batch_size must be greater than 0",
            ));
        }
        if self.loader.prefetch_batches == 0 {
            return Err(RuntimeError::config(
                "loader.prefetch_batches must be greater than 0",
            ));
        }

        if self.storage.buffer_size == 0 {
            return Err(RuntimeError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Table, column and index names are spliced into SQL text, so they are
/// restricted to plain identifiers.
pub(crate) fn validate_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(RuntimeError::config(format!(
            "{field} must be a plain SQL identifier, got '{value}'"
        )))
    }
}
