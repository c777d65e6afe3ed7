// rust/mixjoin-core/src/dataset/mod.rs

//! The training-time join pipeline.
//!
//! A [`CyclingSequence`] restarts the shard sequence every time it runs out,
//! a [`MixedJoinIterator`] looks every shard record up in the keyed store and
//! yields merged [`Record`]s, and a [`TrainLoader`] fans this out over worker
//! threads and collates the records into [`JoinedBatch`]es.
//!
//! # Example
//!
//! ```ignore
//! let store = KeyedStore::new("data.sqlite", &StoreConfig::default())?;
//! let shards = ShardStore::open(storage, true)?;
//!
//! for record in MixedJoinIterator::new(&store, shards)?.take(5) {
//!     let record = record?;
//!     println!("{} {} {}", record["id"], record["dummy_text"], record["name"]);
//! }
//! ```

mod collate;
mod cycle;
mod join;
mod loader;
mod record;

pub use collate::{collate, JoinedBatch};
pub use cycle::CyclingSequence;
pub use join::MixedJoinIterator;
pub use loader::{LoaderIter, LoaderStream, TrainLoader};
pub use record::Record;
