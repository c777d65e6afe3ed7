// rust/mixjoin-core/src/shards/writer.rs

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::format::{
    checksum, compress, encode_record, shard_basename, ShardEntry, ShardIndex, ShardRecord,
    INDEX_FILE, INDEX_VERSION,
};
use crate::config::{Compression, ShardConfig};
use crate::error::{Result, RuntimeError};
use crate::storage::StorageBackend;

/// Writes records into a shard directory.
///
/// Records are buffered until the raw payload would exceed the configured
/// size limit, then the buffer is compressed and written out as the next
/// shard file. A record larger than the limit gets a shard of its own.
/// [`ShardWriter::finish`] must be called to write `index.json`; shard files
/// without an index are invisible to readers.
pub struct ShardWriter {
    storage: Arc<dyn StorageBackend>,
    key_field: String,
    compression: Compression,
    compression_level: i32,
    size_limit: usize,
    buffer: Vec<u8>,
    buffered_samples: u64,
    entries: Vec<ShardEntry>,
    finished: bool,
}

impl ShardWriter {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        key_field: impl Into<String>,
        config: &ShardConfig,
    ) -> Result<Self> {
        if config.size_limit == 0 {
            return Err(RuntimeError::config("shards.size_limit must be greater than 0"));
        }
        storage.create_dir_all(Path::new(""))?;

        Ok(Self {
            storage,
            key_field: key_field.into(),
            compression: config.compression,
            compression_level: config.compression_level,
            size_limit: config.size_limit,
            buffer: Vec::new(),
            buffered_samples: 0,
            entries: Vec::new(),
            finished: false,
        })
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Fails with `MissingKey` if the record has no key field, since such a
    /// record could never be joined.
    pub fn write(&mut self, record: &ShardRecord) -> Result<()> {
        if !record.contains_key(&self.key_field) {
            return Err(RuntimeError::missing_key(&self.key_field));
        }

        let line = encode_record(record)?;
        if !self.buffer.is_empty() && self.buffer.len() + line.len() > self.size_limit {
            self.flush_shard()?;
        }

        self.buffer.extend_from_slice(&line);
        self.buffered_samples += 1;
        Ok(())
    }

    /// Appends a JSON value, which must be an object.
    pub fn write_value(&mut self, value: Value) -> Result<()> {
        match value {
            Value::Object(map) => self.write(&map),
            other => Err(RuntimeError::serialization(format!(
                "shard records must be JSON objects, got {other}"
            ))),
        }
    }

    /// Number of shard files written so far.
    pub fn shards_written(&self) -> usize {
        self.entries.len()
    }

    fn flush_shard(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let basename = shard_basename(self.entries.len(), self.compression);
        let stored = compress(&self.buffer, self.compression, self.compression_level)?;

        let mut writer = self.storage.open_write(Path::new(&basename))?;
        writer.write_all(&stored).map_err(|e| {
            RuntimeError::storage_with_source(
                self.storage.root().join(&basename),
                "failed to write shard",
                e,
            )
        })?;
        writer.finish()?;

        debug!(
            shard = %basename,
            samples = self.buffered_samples,
            raw_bytes = self.buffer.len(),
            stored_bytes = stored.len(),
            "wrote shard"
        );

        self.entries.push(ShardEntry {
            basename,
            compression: self.compression,
            samples: self.buffered_samples,
            raw_bytes: self.buffer.len() as u64,
            stored_bytes: stored.len() as u64,
            xxhash64: checksum(&stored),
        });
        self.buffer.clear();
        self.buffered_samples = 0;
        Ok(())
    }

    /// Flushes the last shard and atomically writes the index.
    pub fn finish(mut self) -> Result<ShardIndex> {
        self.flush_shard()?;

        let index = ShardIndex {
            version: INDEX_VERSION,
            key_field: self.key_field.clone(),
            shards: std::mem::take(&mut self.entries),
        };
        if index.shards.is_empty() {
            warn!(dir = %self.storage.root().display(), "writing shard index with no shards");
        }

        let tmp_name = format!("{INDEX_FILE}.tmp");
        let mut writer = self.storage.open_write(Path::new(&tmp_name))?;
        writer.write_all(&index.to_json()?).map_err(|e| {
            RuntimeError::storage_with_source(
                self.storage.root().join(&tmp_name),
                "failed to write shard index",
                e,
            )
        })?;
        writer.finish()?;
        self.storage
            .rename(Path::new(&tmp_name), Path::new(INDEX_FILE))?;

        self.finished = true;
        info!(
            dir = %self.storage.root().display(),
            shards = index.shards.len(),
            samples = index.total_samples(),
            "shard directory written"
        );
        Ok(index)
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        if !self.finished && (self.buffered_samples > 0 || !self.entries.is_empty()) {
            warn!(
                dir = %self.storage.root().display(),
                "shard writer dropped without finish; index.json was not written"
            );
        }
    }
}
