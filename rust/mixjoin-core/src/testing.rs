// rust/mixjoin-core/src/testing.rs

//! Fixtures shared by the unit tests.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::Value;
use tempfile::TempDir;

use crate::config::{ShardConfig, StorageConfig, StoreConfig};
use crate::shards::{ShardStore, ShardWriter};
use crate::storage::{LocalStorage, StorageBackend};
use crate::store::{materialize, KeyedStore};

pub(crate) fn write_parquet_batch(path: &Path, schema: SchemaRef, columns: Vec<ArrayRef>) {
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

/// Writes an `(id, name)` table.
pub(crate) fn write_parquet(path: &Path, rows: &[(i64, &str)]) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|(id, _)| *id))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|(_, name)| *name))),
    ];
    write_parquet_batch(path, schema, columns);
}

/// Materializes `rows` into `dir/data.sqlite` and returns the store.
pub(crate) fn build_store(dir: &TempDir, rows: &[(i64, &str)]) -> KeyedStore {
    let parquet = dir.path().join("df.parquet");
    write_parquet(&parquet, rows);
    let store_path = dir.path().join("data.sqlite");
    materialize(&parquet, &store_path, &StoreConfig::default()).unwrap();
    KeyedStore::new(store_path, &StoreConfig::default()).unwrap()
}

/// Writes `records` into `dir/data` and opens the directory.
pub(crate) fn build_shards(dir: &TempDir, records: &[Value], config: &ShardConfig) -> ShardStore {
    let storage: Arc<dyn StorageBackend> =
        Arc::new(LocalStorage::new(dir.path().join("data"), &StorageConfig::default()).unwrap());
    let mut writer = ShardWriter::new(storage.clone(), "id", config).unwrap();
    for record in records {
        writer.write_value(record.clone()).unwrap();
    }
    writer.finish().unwrap();
    ShardStore::open(storage, config.verify_checksums).unwrap()
}
