// rust/mixjoin-core/src/shards/reader.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::format::{
    checksum, decode_record, decompress, find_record_end, last_record_boundary, ShardEntry,
    ShardIndex, ShardRecord, INDEX_FILE,
};
use crate::config::Compression;
use crate::error::{Result, RuntimeError};
use crate::storage::{StorageBackend, StorageReader};

/// Default bytes per range read for uncompressed shards.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A half-open range of global sample positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    pub start: u64,
    pub end: u64,
}

impl SampleRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end: end.max(start) }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// An opened shard directory.
///
/// Cheap to clone; every [`ShardStore::sequence`] call returns an independent
/// cursor, so each worker can read without contending on shared state.
#[derive(Clone)]
pub struct ShardStore {
    storage: Arc<dyn StorageBackend>,
    index: Arc<ShardIndex>,
    verify_checksums: bool,
    chunk_size: usize,
}

impl std::fmt::Debug for ShardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardStore")
            .field("root", &self.storage.root())
            .field("num_shards", &self.index.shards.len())
            .field("total_samples", &self.index.total_samples())
            .finish()
    }
}

impl ShardStore {
    /// Opens a shard directory by reading its index.
    pub fn open(storage: Arc<dyn StorageBackend>, verify_checksums: bool) -> Result<Self> {
        let root = storage.root().display().to_string();
        let mut reader = storage.open_read(Path::new(INDEX_FILE))?;
        let index = ShardIndex::from_json(&root, &reader.read_all()?)?;

        debug!(
            dir = %root,
            shards = index.shards.len(),
            samples = index.total_samples(),
            "opened shard index"
        );

        Ok(Self {
            storage,
            index: Arc::new(index),
            verify_checksums,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Sets the number of bytes per range read for uncompressed shards.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn index(&self) -> &ShardIndex {
        &self.index
    }

    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    pub fn key_field(&self) -> &str {
        &self.index.key_field
    }

    pub fn total_samples(&self) -> u64 {
        self.index.total_samples()
    }

    pub fn full_range(&self) -> SampleRange {
        SampleRange::new(0, self.total_samples())
    }

    /// Contiguous slice of the sample space read by `worker_id` out of
    /// `num_workers`. Partitions are disjoint and together cover every sample.
    pub fn partition(&self, worker_id: u32, num_workers: u32) -> Result<SampleRange> {
        if num_workers == 0 || worker_id >= num_workers {
            return Err(RuntimeError::invalid_worker(worker_id, num_workers));
        }
        let total = self.total_samples() as u128;
        let start = total * worker_id as u128 / num_workers as u128;
        let end = total * (worker_id as u128 + 1) / num_workers as u128;
        Ok(SampleRange::new(start as u64, end as u64))
    }

    /// A fresh sequence over every record, in index order.
    pub fn sequence(&self) -> ShardSequence {
        self.sequence_range(self.full_range())
    }

    /// A fresh sequence over the records in `range`. Shards entirely outside
    /// the range are never opened.
    pub fn sequence_range(&self, range: SampleRange) -> ShardSequence {
        let end = range.end.min(self.total_samples());
        ShardSequence {
            store: self.clone(),
            range: SampleRange::new(range.start.min(end), end),
            position: range.start.min(end),
            next_shard: 0,
            next_shard_start: 0,
            cursor: None,
            done: false,
        }
    }
}

/// A finite, ordered sequence of shard records.
///
/// Shards are opened lazily one at a time. Compressed (or checksum-verified)
/// shards are read whole; uncompressed shards are streamed in range reads
/// that end on record boundaries. After the first error the sequence ends.
pub struct ShardSequence {
    store: ShardStore,
    range: SampleRange,
    /// Global position of the next record to yield.
    position: u64,
    next_shard: usize,
    /// Global position of the first record of `next_shard`.
    next_shard_start: u64,
    cursor: Option<ShardCursor>,
    done: bool,
}

impl ShardSequence {
    pub fn range(&self) -> SampleRange {
        self.range
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Records left in this sequence.
    pub fn remaining(&self) -> u64 {
        if self.done {
            0
        } else {
            self.range.end - self.position
        }
    }

    fn next_record(&mut self) -> Result<Option<ShardRecord>> {
        if self.position >= self.range.end {
            return Ok(None);
        }

        loop {
            if let Some(cursor) = self.cursor.as_mut() {
                if let Some(record) = cursor.next_record()? {
                    self.position += 1;
                    return Ok(Some(record));
                }
                self.cursor = None;
            }
            self.open_next_shard()?;
        }
    }

    /// Opens the shard holding `self.position`, skipping whole shards that
    /// lie before it and records inside it that precede it.
    fn open_next_shard(&mut self) -> Result<()> {
        let shards = &self.store.index.shards;
        while self.next_shard < shards.len() {
            let entry = &shards[self.next_shard];
            let shard_start = self.next_shard_start;
            let shard_end = shard_start + entry.samples;
            self.next_shard += 1;
            self.next_shard_start = shard_end;

            if shard_end <= self.position {
                continue;
            }

            let mut cursor = ShardCursor::open(&self.store, entry)?;
            let skip = self.position - shard_start;
            for _ in 0..skip {
                cursor.skip_record()?;
            }
            self.cursor = Some(cursor);
            return Ok(());
        }

        Err(RuntimeError::dataset(
            self.store.root().display().to_string(),
            format!(
                "shard files ended at record {} but the index promises {}",
                self.position, self.range.end
            ),
        ))
    }
}

impl Iterator for ShardSequence {
    type Item = Result<ShardRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read position inside one shard file.
struct ShardCursor {
    name: String,
    path: PathBuf,
    /// Decoded bytes currently held.
    chunk: Vec<u8>,
    offset: usize,
    /// Remaining range reads for streamed shards.
    stream: Option<RangeStream>,
    samples_left: u64,
}

struct RangeStream {
    reader: Box<dyn StorageReader>,
    file_offset: u64,
    file_size: u64,
    chunk_size: usize,
}

impl ShardCursor {
    fn open(store: &ShardStore, entry: &ShardEntry) -> Result<Self> {
        let path = store.root().join(&entry.basename);
        let mut reader = store.storage.open_read(Path::new(&entry.basename))?;

        let streamed = entry.compression == Compression::None && !store.verify_checksums;
        let (chunk, stream) = if streamed {
            let file_size = reader.size();
            let stream = RangeStream {
                reader,
                file_offset: 0,
                file_size,
                chunk_size: store.chunk_size,
            };
            (Vec::new(), Some(stream))
        } else {
            let stored = reader.read_all()?;
            if store.verify_checksums && checksum(&stored) != entry.xxhash64 {
                return Err(RuntimeError::dataset(
                    &entry.basename,
                    "shard checksum does not match index",
                ));
            }
            (decompress(&entry.basename, &stored, entry.compression)?, None)
        };

        Ok(Self {
            name: entry.basename.clone(),
            path,
            chunk,
            offset: 0,
            stream,
            samples_left: entry.samples,
        })
    }

    /// Returns the raw bytes of the next record, refilling from the stream
    /// when the held chunk is consumed.
    fn next_line(&mut self) -> Result<Option<(usize, usize)>> {
        if self.samples_left == 0 {
            return Ok(None);
        }
        if self.offset >= self.chunk.len() && !self.fill()? {
            return Err(RuntimeError::dataset(
                &self.name,
                format!(
                    "shard {} ended with {} records still expected",
                    self.path.display(),
                    self.samples_left
                ),
            ));
        }

        let start = self.offset;
        let end = find_record_end(&self.chunk, start).unwrap_or(self.chunk.len());
        self.offset = end;
        self.samples_left -= 1;
        Ok(Some((start, end)))
    }

    fn next_record(&mut self) -> Result<Option<ShardRecord>> {
        match self.next_line()? {
            Some((start, end)) => decode_record(&self.name, &self.chunk[start..end]).map(Some),
            None => Ok(None),
        }
    }

    fn skip_record(&mut self) -> Result<()> {
        self.next_line().map(|_| ())
    }

    /// Loads the next range of a streamed shard, growing the read until it
    /// holds at least one whole record. Returns false at end of file.
    fn fill(&mut self) -> Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };

        let remaining = stream.file_size - stream.file_offset;
        if remaining == 0 {
            return Ok(false);
        }

        let mut read_size = (stream.chunk_size as u64).min(remaining) as usize;
        let mut data = stream.reader.read_range(stream.file_offset, read_size)?;
        let mut end = last_record_boundary(&data);

        while end == 0 && (read_size as u64) < remaining {
            read_size = (read_size * 2).min(remaining as usize);
            data = stream.reader.read_range(stream.file_offset, read_size)?;
            end = last_record_boundary(&data);
        }

        if end == 0 {
            // Final record without a trailing newline
            end = data.len();
        }
        data.truncate(end);

        stream.file_offset += end as u64;
        self.chunk = data;
        self.offset = 0;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ShardConfig, StorageConfig};
    use crate::shards::ShardWriter;
    use crate::storage::LocalStorage;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_shards(dir: &TempDir, count: u64, config: &ShardConfig) -> Arc<dyn StorageBackend> {
        let storage: Arc<dyn StorageBackend> =
            Arc::new(LocalStorage::new(dir.path(), &StorageConfig::default()).unwrap());
        let mut writer = ShardWriter::new(storage.clone(), "id", config).unwrap();
        for i in 0..count {
            writer
                .write_value(json!({"id": i, "dummy_text": format!("Dummy text {i}")}))
                .unwrap();
        }
        writer.finish().unwrap();
        storage
    }

    fn ids(sequence: ShardSequence) -> Vec<u64> {
        sequence
            .map(|r| r.unwrap()["id"].as_u64().unwrap())
            .collect()
    }

    #[test]
    fn test_sequence_reads_all_in_order() {
        let dir = TempDir::new().unwrap();
        let storage = write_shards(&dir, 50, &ShardConfig { size_limit: 128, ..Default::default() });

        let store = ShardStore::open(storage, true).unwrap();
        assert!(store.index().shards.len() > 1);
        assert_eq!(ids(store.sequence()), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_streamed_uncompressed_small_chunks() {
        let dir = TempDir::new().unwrap();
        let config = ShardConfig {
            compression: Compression::None,
            size_limit: 1024,
            ..Default::default()
        };
        let storage = write_shards(&dir, 40, &config);

        // A chunk smaller than one record forces the read to grow
        let store = ShardStore::open(storage, false).unwrap().with_chunk_size(7);
        assert_eq!(ids(store.sequence()), (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_range_skips_into_middle_of_shard() {
        let dir = TempDir::new().unwrap();
        let storage = write_shards(&dir, 30, &ShardConfig { size_limit: 200, ..Default::default() });
        let store = ShardStore::open(storage, true).unwrap();

        let seq = store.sequence_range(SampleRange::new(7, 19));
        assert_eq!(seq.remaining(), 12);
        assert_eq!(ids(seq), (7..19).collect::<Vec<_>>());
    }

    #[test]
    fn test_partitions_cover_all_samples_once() {
        let dir = TempDir::new().unwrap();
        let storage = write_shards(&dir, 23, &ShardConfig { size_limit: 100, ..Default::default() });
        let store = ShardStore::open(storage, true).unwrap();

        let mut seen = Vec::new();
        for worker in 0..4 {
            let range = store.partition(worker, 4).unwrap();
            seen.extend(ids(store.sequence_range(range)));
        }
        assert_eq!(seen, (0..23).collect::<Vec<_>>());
    }

    #[test]
    fn test_partition_out_of_range() {
        let dir = TempDir::new().unwrap();
        let storage = write_shards(&dir, 3, &ShardConfig::default());
        let store = ShardStore::open(storage, true).unwrap();

        assert!(matches!(
            store.partition(2, 2),
            Err(RuntimeError::InvalidWorker { worker_id: 2, num_workers: 2 })
        ));
        // More workers than samples leaves some partitions empty
        assert!(store.partition(0, 8).unwrap().is_empty());
    }

    #[test]
    fn test_checksum_mismatch_is_reported() {
        let dir = TempDir::new().unwrap();
        let storage = write_shards(&dir, 5, &ShardConfig::default());
        let store = ShardStore::open(storage, true).unwrap();

        let basename = store.index().shards[0].basename.clone();
        let path = dir.path().join(&basename);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let mut seq = store.sequence();
        let err = seq.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("checksum"));
        assert!(seq.next().is_none());
    }

    #[test]
    fn test_truncated_shard_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = ShardConfig {
            compression: Compression::None,
            ..Default::default()
        };
        let storage = write_shards(&dir, 4, &config);
        let store = ShardStore::open(storage, false).unwrap();

        let path = dir.path().join(&store.index().shards[0].basename);
        let content = std::fs::read_to_string(&path).unwrap();
        let first_two: String = content.lines().take(2).map(|l| format!("{l}\n")).collect();
        std::fs::write(&path, first_two).unwrap();

        let results: Vec<_> = store.sequence().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].as_ref().unwrap_err().to_string().contains("still expected"));
    }

    #[test]
    fn test_missing_index() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn StorageBackend> =
            Arc::new(LocalStorage::new(dir.path(), &StorageConfig::default()).unwrap());
        assert!(ShardStore::open(storage, true).is_err());
    }
}
