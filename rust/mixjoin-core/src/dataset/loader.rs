// rust/mixjoin-core/src/dataset/loader.rs

//! Multi-worker batch loading.
//!
//! Each worker owns a contiguous partition of the shard samples, its own
//! shard cursor and its own store reader handle, so workers share no
//! iteration state. Worker threads push collated batches into bounded
//! `crossbeam` channels; the consumer drains them round-robin, which keeps
//! the batch order deterministic for a given configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::collate::JoinedBatch;
use super::join::MixedJoinIterator;
use super::record::Record;
use crate::config::LoaderConfig;
use crate::error::{Result, RuntimeError};
use crate::shards::ShardStore;
use crate::store::KeyedStore;

/// Produces training batches from the join of a shard directory and a
/// keyed store.
#[derive(Debug, Clone)]
pub struct TrainLoader {
    store: KeyedStore,
    shards: ShardStore,
    batch_size: usize,
    num_workers: u32,
    prefetch_batches: usize,
}

impl TrainLoader {
    pub fn new(store: KeyedStore, shards: ShardStore, config: &LoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(RuntimeError::config("loader.batch_size must be greater than 0"));
        }
        if config.prefetch_batches == 0 {
            return Err(RuntimeError::config(
                "loader.prefetch_batches must be greater than 0",
            ));
        }
        let num_workers = u32::try_from(config.num_workers)
            .map_err(|_| RuntimeError::config("loader.num_workers is too large"))?;

        Ok(Self {
            store,
            shards,
            batch_size: config.batch_size,
            num_workers,
            prefetch_batches: config.prefetch_batches,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_workers(&self) -> u32 {
        self.num_workers
    }

    /// Starts the workers and returns the batch iterator.
    ///
    /// With zero workers the join runs inline, and any setup failure is
    /// returned here. With worker threads, setup failures arrive as the
    /// first error from the iterator.
    pub fn iter(&self) -> Result<LoaderIter> {
        info!(
            shards = %self.shards.root().display(),
            store = %self.store.path().display(),
            workers = self.num_workers,
            batch_size = self.batch_size,
            "starting train loader"
        );

        if self.num_workers == 0 {
            let batches = WorkerBatches::open(&self.store, &self.shards, 0, 1, self.batch_size)?;
            return Ok(LoaderIter {
                inner: Inner::Inline(batches),
            });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut receivers = Vec::with_capacity(self.num_workers as usize);
        let mut handles = Vec::with_capacity(self.num_workers as usize);

        for worker_id in 0..self.num_workers {
            let (tx, rx) = channel::bounded(self.prefetch_batches);
            match self.spawn_worker(worker_id, tx, stop.clone()) {
                Ok(handle) => {
                    receivers.push(rx);
                    handles.push(handle);
                }
                Err(e) => {
                    shutdown_workers(&stop, &mut receivers, &mut handles);
                    return Err(RuntimeError::config_with_source(
                        "failed to spawn loader worker",
                        e,
                    ));
                }
            }
        }

        Ok(LoaderIter {
            inner: Inner::Threads {
                receivers,
                handles,
                stop,
                next_worker: 0,
                done: false,
            },
        })
    }

    fn spawn_worker(
        &self,
        worker_id: u32,
        tx: Sender<Result<JoinedBatch>>,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let store = self.store.clone();
        let shards = self.shards.clone();
        let num_workers = self.num_workers;
        let batch_size = self.batch_size;

        std::thread::Builder::new()
            .name(format!("mixjoin-worker-{worker_id}"))
            .spawn(move || {
                let batches =
                    match WorkerBatches::open(&store, &shards, worker_id, num_workers, batch_size) {
                        Ok(batches) => batches,
                        Err(e) => {
                            warn!(worker = worker_id, error = %e, "worker failed to start");
                            let _ = tx.send(Err(e));
                            return;
                        }
                    };

                for batch in batches {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Err(e) = &batch {
                        warn!(worker = worker_id, error = %e, "worker failed");
                    }
                    let failed = batch.is_err();
                    if tx.send(batch).is_err() || failed {
                        break; // Consumer dropped, or error delivered
                    }
                }
                debug!(worker = worker_id, "worker stopped");
            })
    }

    /// Runs the workers on Tokio's blocking pool and streams their batches
    /// in arrival order. Dropping the stream stops the workers.
    ///
    /// # Errors
    ///
    /// Fails with `Config` when called outside a Tokio runtime.
    pub fn into_stream(self) -> Result<LoaderStream> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RuntimeError::config_with_source("into_stream needs a Tokio runtime", e))?;

        let num_workers = self.num_workers.max(1);
        let (tx, rx) = mpsc::channel(self.prefetch_batches * num_workers as usize);
        let stop = Arc::new(AtomicBool::new(false));

        for worker_id in 0..num_workers {
            let tx = tx.clone();
            let store = self.store.clone();
            let shards = self.shards.clone();
            let batch_size = self.batch_size;
            let stop = stop.clone();

            runtime.spawn_blocking(move || {
                let batches =
                    match WorkerBatches::open(&store, &shards, worker_id, num_workers, batch_size) {
                        Ok(batches) => batches,
                        Err(e) => {
                            let _ = tx.blocking_send(Err(e));
                            return;
                        }
                    };

                for batch in batches {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    let failed = batch.is_err();
                    if failed {
                        stop.store(true, Ordering::Relaxed);
                    }
                    if tx.blocking_send(batch).is_err() || failed {
                        return;
                    }
                }
            });
        }

        Ok(LoaderStream {
            rx,
            stop,
            done: false,
        })
    }
}

/// Async batch stream returned by [`TrainLoader::into_stream`].
///
/// Like [`LoaderIter`], it ends after yielding the first worker error.
pub struct LoaderStream {
    rx: mpsc::Receiver<Result<JoinedBatch>>,
    stop: Arc<AtomicBool>,
    done: bool,
}

impl LoaderStream {
    /// Receives the next batch, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<JoinedBatch>> {
        if self.done {
            return None;
        }
        let failure = match self.rx.recv().await {
            Some(Ok(batch)) => return Some(Ok(batch)),
            Some(Err(e)) => e,
            None => RuntimeError::dataset(
                "loader stream",
                "workers exited without reporting an error",
            ),
        };

        self.done = true;
        self.stop.store(true, Ordering::Relaxed);
        // Fails every pending blocking_send, so no batch follows the error
        self.rx.close();
        Some(Err(failure))
    }
}

impl Drop for LoaderStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Batches produced by one worker.
struct WorkerBatches {
    join: MixedJoinIterator,
    batch_size: usize,
    worker_id: u32,
    batch_index: u64,
    done: bool,
}

impl WorkerBatches {
    fn open(
        store: &KeyedStore,
        shards: &ShardStore,
        worker_id: u32,
        num_workers: u32,
        batch_size: usize,
    ) -> Result<Self> {
        let range = shards.partition(worker_id, num_workers)?;
        let join = MixedJoinIterator::with_range(store, shards.clone(), range)?;
        debug!(
            worker = worker_id,
            start = range.start,
            end = range.end,
            "worker opened partition"
        );

        Ok(Self {
            join,
            batch_size,
            worker_id,
            batch_index: 0,
            done: false,
        })
    }

    fn next_batch(&mut self) -> Result<JoinedBatch> {
        let records = self
            .join
            .by_ref()
            .take(self.batch_size)
            .collect::<Result<Vec<Record>>>()?;
        let batch = JoinedBatch::collate(&records, self.worker_id, self.batch_index)?;
        self.batch_index += 1;
        Ok(batch)
    }
}

impl Iterator for WorkerBatches {
    type Item = Result<JoinedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let batch = self.next_batch();
        if batch.is_err() {
            self.done = true;
        }
        Some(batch)
    }
}

/// Iterator over loader batches.
///
/// Ends after yielding the first worker error. Dropping it stops and joins
/// every worker thread, releasing their store handles.
pub struct LoaderIter {
    inner: Inner,
}

enum Inner {
    Inline(WorkerBatches),
    Threads {
        receivers: Vec<Receiver<Result<JoinedBatch>>>,
        handles: Vec<JoinHandle<()>>,
        stop: Arc<AtomicBool>,
        next_worker: usize,
        done: bool,
    },
}

impl Iterator for LoaderIter {
    type Item = Result<JoinedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Inner::Inline(batches) => batches.next(),
            Inner::Threads {
                receivers,
                next_worker,
                done,
                ..
            } => {
                if *done {
                    return None;
                }
                let worker = *next_worker;
                *next_worker = (worker + 1) % receivers.len();

                match receivers[worker].recv() {
                    Ok(Ok(batch)) => Some(Ok(batch)),
                    Ok(Err(e)) => {
                        *done = true;
                        Some(Err(e))
                    }
                    Err(_) => {
                        *done = true;
                        Some(Err(RuntimeError::dataset(
                            format!("loader worker {worker}"),
                            "worker exited without reporting an error",
                        )))
                    }
                }
            }
        }
    }
}

impl Drop for LoaderIter {
    fn drop(&mut self) {
        if let Inner::Threads {
            receivers,
            handles,
            stop,
            ..
        } = &mut self.inner
        {
            shutdown_workers(stop, receivers, handles);
        }
    }
}

fn shutdown_workers(
    stop: &AtomicBool,
    receivers: &mut Vec<Receiver<Result<JoinedBatch>>>,
    handles: &mut Vec<JoinHandle<()>>,
) {
    stop.store(true, Ordering::Relaxed);
    // Disconnecting unblocks any worker waiting on a full channel
    receivers.clear();
    for handle in handles.drain(..) {
        if handle.join().is_err() {
            warn!("loader worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardConfig;
    use crate::testing::{build_shards, build_store};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn fixture(dir: &TempDir, count: i64) -> (KeyedStore, ShardStore) {
        let names: Vec<String> = (0..count).map(|i| format!("row {i}")).collect();
        let rows: Vec<(i64, &str)> = (0..count).map(|i| (i, names[i as usize].as_str())).collect();
        let store = build_store(dir, &rows);
        let records: Vec<Value> = (0..count)
            .map(|i| json!({"id": i, "dummy_text": format!("Dummy text {i}")}))
            .collect();
        let shards = build_shards(dir, &records, &ShardConfig { size_limit: 96, ..Default::default() });
        (store, shards)
    }

    fn loader_config(batch_size: usize, num_workers: usize) -> LoaderConfig {
        LoaderConfig {
            batch_size,
            num_workers,
            prefetch_batches: 2,
        }
    }

    #[test]
    fn test_inline_loader_batches_joined_records() {
        let dir = TempDir::new().unwrap();
        let (store, shards) = fixture(&dir, 3);
        let loader = TrainLoader::new(store, shards, &loader_config(2, 0)).unwrap();

        let batches: Vec<JoinedBatch> = loader.iter().unwrap().take(2).map(|b| b.unwrap()).collect();
        assert_eq!(batches[0].get("id"), Some(&json!([0, 1])));
        assert_eq!(batches[0].get("name"), Some(&json!(["row 0", "row 1"])));
        assert_eq!(batches[1].get("id"), Some(&json!([2, 0])));
        assert_eq!(batches[1].batch_index, 1);
        assert!(batches.iter().all(|b| b.worker_id == 0 && b.len() == 2));
    }

    #[test]
    fn test_workers_are_read_round_robin() {
        let dir = TempDir::new().unwrap();
        let (store, shards) = fixture(&dir, 10);
        let loader = TrainLoader::new(store, shards, &loader_config(2, 2)).unwrap();

        let batches: Vec<JoinedBatch> = loader.iter().unwrap().take(6).map(|b| b.unwrap()).collect();
        let ids: Vec<Value> = batches.iter().map(|b| b.get("id").unwrap().clone()).collect();
        assert_eq!(
            ids,
            vec![
                json!([0, 1]),
                json!([5, 6]),
                json!([2, 3]),
                json!([7, 8]),
                json!([4, 0]),
                json!([9, 5]),
            ]
        );
        let workers: Vec<u32> = batches.iter().map(|b| b.worker_id).collect();
        assert_eq!(workers, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_dropping_loader_releases_handles() {
        let dir = TempDir::new().unwrap();
        let (store, shards) = fixture(&dir, 8);
        let loader = TrainLoader::new(store.clone(), shards, &loader_config(2, 3)).unwrap();

        let mut iter = loader.iter().unwrap();
        for _ in 0..4 {
            iter.next().unwrap().unwrap();
        }
        assert_eq!(store.open_readers(), 3);

        drop(iter);
        assert_eq!(store.open_readers(), 0);
    }

    #[test]
    fn test_worker_error_ends_loader() {
        let dir = TempDir::new().unwrap();
        let store = build_store(&dir, &[(1, "a")]);
        let shards = build_shards(
            &dir,
            &[json!({"id": 1}), json!({"id": 3})],
            &ShardConfig::default(),
        );
        let loader = TrainLoader::new(store.clone(), shards, &loader_config(2, 1)).unwrap();

        let results: Vec<_> = loader.iter().unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(RuntimeError::JoinMiss { .. })));
        assert_eq!(store.open_readers(), 0);
    }

    #[test]
    fn test_silent_worker_exit_is_an_error() {
        let (tx, rx) = channel::bounded::<Result<JoinedBatch>>(1);
        let handle = std::thread::spawn(move || {
            let _tx = tx;
            panic!("worker crashed");
        });
        let mut iter = LoaderIter {
            inner: Inner::Threads {
                receivers: vec![rx],
                handles: vec![handle],
                stop: Arc::new(AtomicBool::new(false)),
                next_worker: 0,
                done: false,
            },
        };

        match iter.next() {
            Some(Err(RuntimeError::Dataset { name, .. })) => assert_eq!(name, "loader worker 0"),
            other => panic!("expected worker exit error, got {other:?}"),
        }
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_shutdown_joins_spawned_workers() {
        let dir = TempDir::new().unwrap();
        let (store, shards) = fixture(&dir, 8);
        let config = LoaderConfig {
            prefetch_batches: 1,
            ..loader_config(1, 2)
        };
        let loader = TrainLoader::new(store.clone(), shards, &config).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let mut receivers = Vec::new();
        let mut handles = Vec::new();
        for worker_id in 0..2 {
            let (tx, rx) = channel::bounded(1);
            handles.push(loader.spawn_worker(worker_id, tx, stop.clone()).unwrap());
            receivers.push(rx);
        }
        // One batch each means both workers hold an open reader
        for rx in &receivers {
            rx.recv().unwrap().unwrap();
        }
        assert_eq!(store.open_readers(), 2);

        shutdown_workers(&stop, &mut receivers, &mut handles);
        assert!(handles.is_empty());
        assert_eq!(store.open_readers(), 0);
    }

    #[test]
    fn test_more_workers_than_samples() {
        let dir = TempDir::new().unwrap();
        let (store, shards) = fixture(&dir, 2);
        let loader = TrainLoader::new(store, shards, &loader_config(1, 4)).unwrap();

        let first = loader.iter().unwrap().next().unwrap();
        assert!(matches!(first, Err(RuntimeError::EmptyShardSource { .. })));
    }

    #[test]
    fn test_invalid_loader_config() {
        let dir = TempDir::new().unwrap();
        let (store, shards) = fixture(&dir, 2);
        assert!(TrainLoader::new(store.clone(), shards.clone(), &loader_config(0, 1)).is_err());

        let config = LoaderConfig {
            prefetch_batches: 0,
            ..loader_config(2, 1)
        };
        assert!(TrainLoader::new(store, shards, &config).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_keeps_per_worker_batch_order() {
        let dir = TempDir::new().unwrap();
        let (store, shards) = fixture(&dir, 6);
        let loader = TrainLoader::new(store, shards, &loader_config(3, 2)).unwrap();

        let mut rx = loader.into_stream().unwrap();
        let mut per_worker = [0u64; 2];
        for _ in 0..6 {
            let batch = rx.recv().await.unwrap().unwrap();
            assert_eq!(batch.len(), 3);
            assert_eq!(batch.batch_index, per_worker[batch.worker_id as usize]);
            per_worker[batch.worker_id as usize] += 1;
        }
        assert_eq!(per_worker.iter().sum::<u64>(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stream_ends_after_worker_error() {
        let dir = TempDir::new().unwrap();
        // Id 0 opens worker 0's partition and has no store row
        let names: Vec<String> = (1..10).map(|i| format!("row {i}")).collect();
        let rows: Vec<(i64, &str)> = (1..10).map(|i| (i, names[i as usize - 1].as_str())).collect();
        let store = build_store(&dir, &rows);
        let records: Vec<Value> = (0..10).map(|i| json!({"id": i})).collect();
        let shards = build_shards(&dir, &records, &ShardConfig::default());
        let loader = TrainLoader::new(store, shards, &loader_config(1, 2)).unwrap();

        let mut rx = loader.into_stream().unwrap();
        let mut failures = 0;
        while let Some(batch) = rx.recv().await {
            match batch {
                Ok(batch) => {
                    assert_eq!(failures, 0, "batch after the worker error");
                    assert_eq!(batch.worker_id, 1);
                }
                Err(RuntimeError::JoinMiss { key }) => {
                    assert_eq!(key, "0");
                    failures += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(failures, 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_reports_silent_worker_exit() {
        let (tx, rx) = mpsc::channel::<Result<JoinedBatch>>(1);
        drop(tx);
        let mut stream = LoaderStream {
            rx,
            stop: Arc::new(AtomicBool::new(false)),
            done: false,
        };

        assert!(matches!(stream.recv().await, Some(Err(RuntimeError::Dataset { .. }))));
        assert!(stream.recv().await.is_none());
        assert!(stream.stop.load(Ordering::Relaxed));
    }

    #[test]
    fn test_stream_requires_runtime() {
        let dir = TempDir::new().unwrap();
        let (store, shards) = fixture(&dir, 2);
        let loader = TrainLoader::new(store, shards, &loader_config(1, 1)).unwrap();
        assert!(matches!(loader.into_stream(), Err(RuntimeError::Config { .. })));
    }
}
