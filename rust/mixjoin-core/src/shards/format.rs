// rust/mixjoin-core/src/shards/format.rs

//! On-disk layout of a shard directory.
//!
//! A directory holds one `index.json` describing every shard in order, and
//! one file per shard containing newline-delimited JSON objects, optionally
//! compressed as a whole.

use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use twox_hash::XxHash64;

use crate::config::Compression;
use crate::error::{Result, RuntimeError};

/// Name of the index file inside a shard directory.
pub const INDEX_FILE: &str = "index.json";

/// Current index layout version.
pub const INDEX_VERSION: u32 = 1;

/// One record as stored in a shard: an ordered JSON object.
pub type ShardRecord = Map<String, Value>;

/// Index of a shard directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardIndex {
    pub version: u32,
    /// Field every record carries as its join key.
    pub key_field: String,
    pub shards: Vec<ShardEntry>,
}

/// Description of a single shard file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardEntry {
    /// File name relative to the shard directory.
    pub basename: String,
    pub compression: Compression,
    /// Number of records in the shard.
    pub samples: u64,
    /// Size of the decompressed payload.
    pub raw_bytes: u64,
    /// Size of the file on disk.
    pub stored_bytes: u64,
    /// xxhash64 (seed 0) of the file on disk.
    pub xxhash64: u64,
}

impl ShardIndex {
    pub fn total_samples(&self) -> u64 {
        self.shards.iter().map(|s| s.samples).sum()
    }

    pub fn from_json(name: &str, bytes: &[u8]) -> Result<Self> {
        let index: Self = serde_json::from_slice(bytes)
            .map_err(|e| RuntimeError::dataset(name, format!("invalid shard index: {e}")))?;

        if index.version != INDEX_VERSION {
            return Err(RuntimeError::dataset(
                name,
                format!(
                    "unsupported shard index version {} (expected {INDEX_VERSION})",
                    index.version
                ),
            ));
        }
        Ok(index)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| RuntimeError::serialization(format!("failed to encode shard index: {e}")))
    }
}

/// Shard file name for the shard at `ordinal`.
pub fn shard_basename(ordinal: usize, compression: Compression) -> String {
    format!("shard.{ordinal:05}.{}", compression.extension())
}

/// Computes the checksum recorded for stored shard bytes.
pub fn checksum(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

pub fn compress(data: &[u8], compression: Compression, level: i32) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        Compression::Zstd => zstd::encode_all(data, level)
            .map_err(|e| RuntimeError::serialization(format!("zstd compression failed: {e}"))),
    }
}

pub fn decompress(name: &str, data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| RuntimeError::dataset(name, format!("lz4 decompression failed: {e}"))),
        Compression::Zstd => zstd::decode_all(data)
            .map_err(|e| RuntimeError::dataset(name, format!("zstd decompression failed: {e}"))),
    }
}

/// Finds the exclusive end of the record starting at `offset`.
///
/// Returns `None` if no newline terminates the record within `data`.
pub fn find_record_end(data: &[u8], offset: usize) -> Option<usize> {
    if offset >= data.len() {
        return None;
    }
    data[offset..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| offset + i + 1)
}

/// Returns the end of the last complete record in `data`, or 0 if none.
pub fn last_record_boundary(data: &[u8]) -> usize {
    data.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1)
}

/// Decodes one line into a record.
pub fn decode_record(name: &str, line: &[u8]) -> Result<ShardRecord> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(RuntimeError::dataset(
            name,
            format!("shard line is not a JSON object: {other}"),
        )),
        Err(e) => Err(RuntimeError::dataset(name, format!("invalid JSON in shard: {e}"))),
    }
}

/// Encodes a record as one newline-terminated line.
pub fn encode_record(record: &ShardRecord) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(record)
        .map_err(|e| RuntimeError::serialization(format!("failed to encode record: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_record_end() {
        let data = b"{\"id\":1}\n{\"id\":2}\n";
        assert_eq!(find_record_end(data, 0), Some(9));
        assert_eq!(find_record_end(data, 9), Some(18));
        assert_eq!(find_record_end(data, 18), None);

        // Unterminated final record
        assert_eq!(find_record_end(b"{\"id\":3}", 0), None);
    }

    #[test]
    fn test_last_record_boundary() {
        assert_eq!(last_record_boundary(b"a\nbb\ncc"), 5);
        assert_eq!(last_record_boundary(b"no newline"), 0);
        assert_eq!(last_record_boundary(b""), 0);
    }

    #[test]
    fn test_decode_record_keeps_field_order() {
        let record = decode_record("t", b"{\"z\":1,\"a\":\"x\"}\r\n").unwrap();
        let keys: Vec<_> = record.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_decode_record_rejects_non_object() {
        let err = decode_record("t", b"[1,2]\n").unwrap_err();
        assert!(err.to_string().contains("not a JSON object"));
        assert!(decode_record("t", b"{broken\n").is_err());
    }

    #[test]
    fn test_compression_roundtrip_per_algorithm() {
        let payload = b"{\"id\":1,\"text\":\"hello hello hello\"}\n".repeat(20);
        for compression in [Compression::None, Compression::Lz4, Compression::Zstd] {
            let stored = compress(&payload, compression, 3).unwrap();
            assert_eq!(decompress("t", &stored, compression).unwrap(), payload);
        }
    }

    #[test]
    fn test_corrupt_zstd_is_dataset_error() {
        let err = decompress("shard.00000", b"not zstd", Compression::Zstd).unwrap_err();
        assert!(matches!(err, RuntimeError::Dataset { .. }));
    }

    #[test]
    fn test_index_version_is_checked() {
        let json = json!({"version": 9, "key_field": "id", "shards": []});
        let err = ShardIndex::from_json("data", json.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unsupported shard index version"));
    }

    #[test]
    fn test_shard_basename() {
        assert_eq!(shard_basename(3, Compression::Zstd), "shard.00003.jsonl.zst");
        assert_eq!(shard_basename(12, Compression::None), "shard.00012.jsonl");
    }
}
