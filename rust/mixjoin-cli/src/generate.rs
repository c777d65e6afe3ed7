// rust/mixjoin-cli/src/generate.rs

//! Synthetic sources for trying the loader end to end.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use mixjoin_core::{MixedDataModule, ShardIndex};

/// Rows per Parquet row group.
const ROWS_PER_BATCH: usize = 8192;

/// Writes a table of `rows` rows with columns `id`, `x`, `y` and
/// `marker_string` to the configured table path.
pub fn write_table(
    module: &MixedDataModule,
    rows: usize,
    seed: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = &module.config().source.table_path;
    create_parent(path)?;

    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("x", DataType::Float64, false),
        Field::new("y", DataType::Float64, false),
        Field::new("marker_string", DataType::Utf8, false),
    ]));
    let mut rng = StdRng::seed_from_u64(seed);
    let mut writer = ArrowWriter::try_new(File::create(path)?, schema.clone(), None)?;

    let mut start = 0;
    while start < rows {
        let end = (start + ROWS_PER_BATCH).min(rows);
        let ids: Vec<i64> = (start as i64..end as i64).collect();
        let xs: Vec<f64> = ids.iter().map(|_| rng.gen_range(-1.0..1.0)).collect();
        let ys: Vec<f64> = ids.iter().map(|_| rng.gen_range(-1.0..1.0)).collect();
        let markers: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(Float64Array::from(xs)),
            Arc::new(Float64Array::from(ys)),
            Arc::new(StringArray::from(markers)),
        ];
        writer.write(&RecordBatch::try_new(schema.clone(), columns)?)?;
        start = end;
    }
    writer.close()?;

    tracing::info!("Wrote {} rows to {}", rows, path.display());
    Ok(())
}

/// Writes shard records with ids `1..=records` and a `dummy_text` field.
pub fn write_shards(
    module: &MixedDataModule,
    records: u64,
) -> Result<ShardIndex, Box<dyn std::error::Error>> {
    let mut writer = module.shard_writer()?;
    for id in 1..=records {
        writer.write_value(json!({
            "id": id,
            "dummy_text": format!("Dummy text {id}"),
        }))?;
    }
    Ok(writer.finish()?)
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
