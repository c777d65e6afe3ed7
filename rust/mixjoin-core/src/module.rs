// rust/mixjoin-core/src/module.rs

//! Training lifecycle entry point.
//!
//! [`MixedDataModule`] ties the configuration to the three steps a training
//! driver runs: materialize the keyed store once, open both sources for a
//! stage, then hand out loaders.
//!
//! # Example
//!
//! ```no_run
//! use mixjoin_core::{MixedDataModule, MixjoinConfig, Stage};
//!
//! let mut module = MixedDataModule::new(MixjoinConfig::default()).unwrap();
//! module.prepare_data().unwrap();
//! module.setup(Stage::Fit).unwrap();
//!
//! for batch in module.train_loader().unwrap().iter().unwrap().take(10) {
//!     let batch = batch.unwrap();
//!     println!("worker {} batch {}: {:?}", batch.worker_id, batch.batch_index, batch.get("id"));
//! }
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::MixjoinConfig;
use crate::dataset::TrainLoader;
use crate::error::{Result, RuntimeError};
use crate::shards::{ShardStore, ShardWriter};
use crate::storage::{LocalStorage, StorageBackend};
use crate::store::{materialize, EtlReport, KeyedStore};

/// Stage a training driver is setting up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fit,
    Validate,
    Test,
    Predict,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fit => "fit",
            Stage::Validate => "validate",
            Stage::Test => "test",
            Stage::Predict => "predict",
        };
        f.write_str(name)
    }
}

/// Sources opened by [`MixedDataModule::setup`].
#[derive(Debug, Clone)]
struct Prepared {
    store: KeyedStore,
    shards: ShardStore,
}

/// Owns the configuration and the opened sources of one training run.
#[derive(Debug)]
pub struct MixedDataModule {
    config: MixjoinConfig,
    prepared: Option<Prepared>,
}

impl MixedDataModule {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: MixjoinConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            prepared: None,
        })
    }

    /// Loads a TOML configuration file, applies `MIXJOIN_*` overrides and
    /// builds the module.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(MixjoinConfig::from_file(path)?.with_env_overrides())
    }

    pub fn config(&self) -> &MixjoinConfig {
        &self.config
    }

    /// Materializes the keyed store from the configured Parquet table.
    ///
    /// Safe to run repeatedly: an existing table is kept unless the
    /// configuration asks for overwrite.
    pub fn prepare_data(&self) -> Result<EtlReport> {
        materialize(
            &self.config.source.table_path,
            &self.config.source.store_path,
            &self.config.store,
        )
    }

    /// Opens the shard index and checks that the keyed store is readable.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` if [`prepare_data`](Self::prepare_data) has not been
    /// run, and `Storage`/`Dataset` errors if the shard directory is missing
    /// or has a bad index.
    pub fn setup(&mut self, stage: Stage) -> Result<()> {
        let store = KeyedStore::new(&self.config.source.store_path, &self.config.store)?;
        let rows = store.check_available()?;
        let shards = ShardStore::open(self.shard_storage()?, self.config.shards.verify_checksums)?;

        info!(
            stage = %stage,
            rows,
            shards = shards.index().shards.len(),
            samples = shards.total_samples(),
            "data module ready"
        );

        self.prepared = Some(Prepared { store, shards });
        Ok(())
    }

    pub fn is_setup(&self) -> bool {
        self.prepared.is_some()
    }

    /// A loader over the training sources.
    ///
    /// # Errors
    ///
    /// Returns `Config` if [`setup`](Self::setup) has not been called.
    pub fn train_loader(&self) -> Result<TrainLoader> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| RuntimeError::config("train_loader called before setup"))?;
        TrainLoader::new(
            prepared.store.clone(),
            prepared.shards.clone(),
            &self.config.loader,
        )
    }

    /// A writer into the configured shard directory, keyed by the store's
    /// key column.
    pub fn shard_writer(&self) -> Result<ShardWriter> {
        ShardWriter::new(
            self.shard_storage()?,
            self.config.store.key_column.clone(),
            &self.config.shards,
        )
    }

    fn shard_storage(&self) -> Result<Arc<dyn StorageBackend>> {
        Ok(Arc::new(LocalStorage::new(
            &self.config.source.shard_dir,
            &self.config.storage,
        )?))
    }
}
