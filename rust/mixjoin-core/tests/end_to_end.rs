// rust/mixjoin-core/tests/end_to_end.rs

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;

use mixjoin_core::{
    MixedDataModule, MixedJoinIterator, MixjoinConfig, RuntimeError, Stage,
};

fn write_table(path: &Path, ids: &[i64], names: &[&str]) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("x", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids.to_vec())),
        Arc::new(StringArray::from(names.to_vec())),
        Arc::new(Float64Array::from_iter_values(ids.iter().map(|&i| i as f64 / 2.0))),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();

    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn module_in(dir: &TempDir, extra: &str) -> MixedDataModule {
    let toml = format!(
        r#"
        [source]
        table_path = "{root}/df.parquet"
        shard_dir = "{root}/data"
        store_path = "{root}/data.sqlite"

        {extra}
        "#,
        root = dir.path().display()
    );
    let config: MixjoinConfig = toml.parse().unwrap();
    MixedDataModule::new(config).unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
struct Sample {
    id: i64,
    dummy_text: String,
    name: String,
    x: f64,
}

#[test]
fn joined_records_cycle_over_shards() {
    let dir = TempDir::new().unwrap();
    let mut module = module_in(&dir, "");
    write_table(&module.config().source.table_path, &[1, 2], &["a", "b"]);

    let mut writer = module.shard_writer().unwrap();
    writer.write_value(json!({"id": 1, "dummy_text": "hi"})).unwrap();
    writer.write_value(json!({"id": 2, "dummy_text": "yo"})).unwrap();
    writer.finish().unwrap();

    module.prepare_data().unwrap();
    module.setup(Stage::Fit).unwrap();

    let store = mixjoin_core::KeyedStore::new(
        &module.config().source.store_path,
        &module.config().store,
    )
    .unwrap();
    let shards = mixjoin_core::ShardStore::open(
        Arc::new(
            mixjoin_core::LocalStorage::new(
                &module.config().source.shard_dir,
                &module.config().storage,
            )
            .unwrap(),
        ),
        true,
    )
    .unwrap();

    let samples: Vec<Sample> = MixedJoinIterator::new(&store, shards)
        .unwrap()
        .take(5)
        .map(|r| r.unwrap().decode().unwrap())
        .collect();

    let expected = [(1, "hi", "a"), (2, "yo", "b"), (1, "hi", "a"), (2, "yo", "b"), (1, "hi", "a")];
    for (sample, (id, text, name)) in samples.iter().zip(expected) {
        assert_eq!(sample.id, id);
        assert_eq!(sample.dummy_text, text);
        assert_eq!(sample.name, name);
        assert_eq!(sample.x, id as f64 / 2.0);
    }
    assert_eq!(samples.len(), 5);
}

#[test]
fn key_missing_from_store_fails_the_loader() {
    let dir = TempDir::new().unwrap();
    let mut module = module_in(&dir, "[loader]\nnum_workers = 1\nbatch_size = 1");
    write_table(&module.config().source.table_path, &[1, 2], &["a", "b"]);

    let mut writer = module.shard_writer().unwrap();
    writer.write_value(json!({"id": 1, "dummy_text": "hi"})).unwrap();
    writer.write_value(json!({"id": 3, "dummy_text": "??"})).unwrap();
    writer.finish().unwrap();

    module.prepare_data().unwrap();
    module.setup(Stage::Fit).unwrap();

    let results: Vec<_> = module.train_loader().unwrap().iter().unwrap().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    match &results[1] {
        Err(RuntimeError::JoinMiss { key }) => assert_eq!(key, "3"),
        other => panic!("expected join miss, got {other:?}"),
    }
}

#[test]
fn workers_cover_every_sample_each_epoch() {
    let dir = TempDir::new().unwrap();
    let mut module = module_in(
        &dir,
        "[loader]\nnum_workers = 3\nbatch_size = 4\nprefetch_batches = 1\n\n[shards]\nsize_limit = 256\ncompression = \"lz4\"",
    );

    let ids: Vec<i64> = (0..30).collect();
    let names: Vec<String> = ids.iter().map(|i| format!("name {i}")).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    write_table(&module.config().source.table_path, &ids, &name_refs);

    let mut writer = module.shard_writer().unwrap();
    for id in &ids {
        writer
            .write_value(json!({"id": id, "dummy_text": format!("Dummy text {id}")}))
            .unwrap();
    }
    assert!(writer.finish().unwrap().shards.len() > 1);

    module.prepare_data().unwrap();
    module.setup(Stage::Fit).unwrap();

    // Partitions of 10 samples each; 15 batches of 4 is two epochs of 30
    let mut seen = Vec::new();
    for batch in module.train_loader().unwrap().iter().unwrap().take(15) {
        let batch = batch.unwrap();
        let batch_ids: Vec<i64> = serde_json::from_value(batch.get("id").unwrap().clone()).unwrap();
        let batch_names: Vec<String> =
            serde_json::from_value(batch.get("name").unwrap().clone()).unwrap();
        for (id, name) in batch_ids.iter().zip(&batch_names) {
            assert_eq!(name, &format!("name {id}"));
        }
        seen.extend(batch_ids);
    }

    let mut counts = [0usize; 30];
    for id in seen {
        counts[id as usize] += 1;
    }
    assert!(counts.iter().all(|&c| c == 2), "{counts:?}");
}
