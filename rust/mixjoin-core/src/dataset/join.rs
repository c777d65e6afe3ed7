// rust/mixjoin-core/src/dataset/join.rs

use tracing::debug;

use super::cycle::CyclingSequence;
use super::record::Record;
use crate::error::{Result, RuntimeError};
use crate::shards::{SampleRange, ShardRecord, ShardSequence, ShardStore};
use crate::store::{KeyedStore, StoreReader};

type ShardFactory = Box<dyn FnMut() -> Result<ShardSequence> + Send>;

/// Joins an endlessly cycling shard sequence against the keyed store.
///
/// Every pulled shard record is looked up by its join key through this
/// iterator's own [`StoreReader`], and the shard fields are merged with the
/// matching row. The iterator never ends on its own; it ends after yielding
/// an error, such as a key with no row (`JoinMiss`) or a record without the
/// key field (`MissingKey`). The reader handle is released on drop.
pub struct MixedJoinIterator {
    reader: StoreReader,
    shards: CyclingSequence<ShardFactory, ShardSequence, ShardRecord>,
    key_field: String,
    records_joined: u64,
    done: bool,
}

impl MixedJoinIterator {
    /// Joins every record of `shards`, cycling forever.
    pub fn new(store: &KeyedStore, shards: ShardStore) -> Result<Self> {
        let range = shards.full_range();
        Self::with_range(store, shards, range)
    }

    /// Joins the records of `shards` in `range`, cycling over that range only.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if the reader handle cannot be opened,
    /// `EmptyShardSource` if the range holds no records, and `Config` if the
    /// shard index was written for a different key field than the store's.
    pub fn with_range(store: &KeyedStore, shards: ShardStore, range: SampleRange) -> Result<Self> {
        if shards.key_field() != store.key_column() {
            return Err(RuntimeError::config(format!(
                "shards in '{}' are keyed by '{}' but the store is keyed by '{}'",
                shards.root().display(),
                shards.key_field(),
                store.key_column()
            )));
        }

        let reader = store.open_reader()?;
        let root = shards.root().to_path_buf();
        let factory: ShardFactory = Box::new(move || Ok(shards.sequence_range(range)));
        let shards = CyclingSequence::new(root, factory)?;

        debug!(
            store = %store.path().display(),
            start = range.start,
            end = range.end,
            "join iterator opened"
        );

        Ok(Self {
            reader,
            shards,
            key_field: store.key_column().to_string(),
            records_joined: 0,
            done: false,
        })
    }

    pub fn records_joined(&self) -> u64 {
        self.records_joined
    }

    pub fn cycles_completed(&self) -> u64 {
        self.shards.cycles_completed()
    }

    fn join(&mut self, shard: ShardRecord) -> Result<Record> {
        let row = match shard.get(&self.key_field) {
            Some(key) => self.reader.get(key)?,
            None => return Err(RuntimeError::missing_key(&self.key_field)),
        };
        Ok(Record::merge(shard, row))
    }
}

impl Iterator for MixedJoinIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = match self.shards.next() {
            Some(Ok(shard)) => self.join(shard),
            Some(Err(e)) => Err(e),
            None => {
                self.done = true;
                return None;
            }
        };

        match result {
            Ok(record) => {
                self.records_joined += 1;
                Some(Ok(record))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for MixedJoinIterator {
    fn drop(&mut self) {
        debug!(
            records = self.records_joined,
            cycles = self.shards.cycles_completed(),
            "join iterator closed"
        );
    }
}
