// rust/mixjoin-core/src/lib.rs

//! Mixed-source join loading - Core Library
//!
//! This crate joins records streamed from chunked shard directories with rows
//! of a keyed SQLite table, cycling the shards forever, and batches the merged
//! records for multi-worker training loops. It also provides the one-time
//! Parquet to SQLite materialization step and a shard writer.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::MixjoinConfig;
pub use error::{Result, RuntimeError};
pub use storage::{LocalStorage, StorageBackend, StorageReader, StorageWriter};

pub mod shards;
pub use shards::{SampleRange, ShardIndex, ShardRecord, ShardSequence, ShardStore, ShardWriter};

pub mod store;
pub use store::{materialize, EtlReport, KeyedStore, StoreReader};

pub mod dataset;
pub use dataset::{
    collate, CyclingSequence, JoinedBatch, LoaderIter, LoaderStream, MixedJoinIterator, Record,
    TrainLoader,
};

pub mod module;
pub use module::{MixedDataModule, Stage};

#[cfg(test)]
pub(crate) mod testing;
