// rust/mixjoin-core/src/shards/mod.rs

//! Chunked shard directories.
//!
//! A shard directory is an ordered set of shard files plus an `index.json`
//! recording, per shard, its record count, compression and checksum. The
//! index lets a worker compute its partition of the sample space and open
//! only the shards it needs.
//!
//! # Example
//!
//! ```ignore
//! let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new("data", &StorageConfig::default())?);
//!
//! let mut writer = ShardWriter::new(storage.clone(), "id", &ShardConfig::default())?;
//! writer.write_value(json!({"id": 1, "dummy_text": "Dummy text 1"}))?;
//! writer.finish()?;
//!
//! let store = ShardStore::open(storage, true)?;
//! for record in store.sequence() {
//!     let record = record?;
//!     // record["id"], record["dummy_text"]
//! }
//! ```

mod format;
mod reader;
mod writer;

pub use format::{ShardEntry, ShardIndex, ShardRecord, INDEX_FILE};
pub use reader::{SampleRange, ShardSequence, ShardStore};
pub use writer::ShardWriter;
