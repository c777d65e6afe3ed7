// rust/mixjoin-core/src/store/etl.rs

//! One-time materialization of a Parquet file into the keyed store.

use std::fs::{self, File};
use std::path::Path;

use arrow::array::{
    Array, BinaryArray, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, LargeBinaryArray, LargeStringArray, StringArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::{DataType, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use tracing::info;

use crate::config::{validate_identifier, EtlMode, StoreConfig};
use crate::error::{Result, RuntimeError};

/// Outcome of a materialization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlReport {
    pub table: String,
    pub columns: Vec<String>,
    pub rows_written: u64,
    /// False when an existing table was kept as is.
    pub created: bool,
}

/// Loads `parquet_path` into the table described by `config` inside the
/// SQLite file at `store_path`, and ensures the unique key index exists.
///
/// With [`EtlMode::CreateIfAbsent`] an existing table is left untouched, so
/// running the step twice is a no-op. With [`EtlMode::Overwrite`] the table is
/// dropped and rebuilt. Rows are inserted in a single transaction after the
/// unique index is created, so duplicate keys abort the whole load.
///
/// # Errors
///
/// Fails with `Config` if the key column is missing or a column type has no
/// SQLite mapping, `Dataset` if the Parquet file cannot be decoded, and
/// `Store` on SQLite failures (including duplicate keys).
pub fn materialize(
    parquet_path: &Path,
    store_path: &Path,
    config: &StoreConfig,
) -> Result<EtlReport> {
    validate_identifier("store.table", &config.table)?;
    validate_identifier("store.key_column", &config.key_column)?;
    validate_identifier("store.index_name", &config.index_name)?;

    let file = File::open(parquet_path).map_err(|e| {
        RuntimeError::storage_with_source(parquet_path, "failed to open parquet file", e)
    })?;
    let source = parquet_path.display().to_string();
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| RuntimeError::dataset(&source, format!("invalid parquet file: {e}")))?;
    let columns = column_types(builder.schema())?;
    let reader = builder
        .with_batch_size(config.etl_batch_rows)
        .build()
        .map_err(|e| RuntimeError::dataset(&source, format!("failed to read parquet: {e}")))?;

    if !columns.iter().any(|(name, _)| name == &config.key_column) {
        return Err(RuntimeError::config(format!(
            "key column '{}' is not in {source}",
            config.key_column
        )));
    }

    if let Some(parent) = store_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                RuntimeError::storage_with_source(parent, "failed to create store directory", e)
            })?;
        }
    }
    let mut conn = Connection::open(store_path)
        .map_err(|e| RuntimeError::store_with_source("failed to open store for writing", e))?;

    let exists = table_exists(&conn, &config.table)?;
    let column_names: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();

    if exists && config.etl_mode == EtlMode::CreateIfAbsent {
        create_index(&conn, config)?;
        info!(
            store = %store_path.display(),
            table = %config.table,
            "table already materialized, keeping it"
        );
        return Ok(EtlReport {
            table: config.table.clone(),
            columns: column_names,
            rows_written: 0,
            created: false,
        });
    }

    info!(
        source = %source,
        store = %store_path.display(),
        table = %config.table,
        columns = columns.len(),
        "materializing keyed store"
    );

    let tx = conn
        .transaction()
        .map_err(|e| RuntimeError::store_with_source("failed to begin transaction", e))?;

    if exists {
        tx.execute_batch(&format!("DROP TABLE \"{}\";", config.table))
            .map_err(|e| RuntimeError::store_with_source("failed to drop existing table", e))?;
    }

    let definition = columns
        .iter()
        .map(|(name, sql_type)| format!("\"{name}\" {sql_type}"))
        .collect::<Vec<_>>()
        .join(", ");
    tx.execute_batch(&format!("CREATE TABLE \"{}\" ({definition});", config.table))
        .map_err(|e| RuntimeError::store_with_source("failed to create table", e))?;
    create_index(&tx, config)?;

    let insert = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        config.table,
        column_names
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", "),
        (1..=column_names.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut rows_written = 0u64;
    {
        let mut stmt = tx
            .prepare(&insert)
            .map_err(|e| RuntimeError::store_with_source("failed to prepare insert", e))?;

        for batch in reader {
            let batch = batch
                .map_err(|e| RuntimeError::dataset(&source, format!("failed to decode batch: {e}")))?;

            for row in 0..batch.num_rows() {
                let values = batch
                    .columns()
                    .iter()
                    .zip(&column_names)
                    .map(|(array, name)| arrow_cell(array.as_ref(), row, name))
                    .collect::<Result<Vec<_>>>()?;

                stmt.execute(params_from_iter(values.iter())).map_err(|e| {
                    RuntimeError::store_with_source(format!("failed to insert row {rows_written}"), e)
                })?;
                rows_written += 1;
            }
        }
    }

    tx.commit()
        .map_err(|e| RuntimeError::store_with_source("failed to commit load", e))?;

    info!(
        store = %store_path.display(),
        table = %config.table,
        rows = rows_written,
        "keyed store materialized"
    );

    Ok(EtlReport {
        table: config.table.clone(),
        columns: column_names,
        rows_written,
        created: true,
    })
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .map_err(|e| RuntimeError::store_with_source("failed to inspect store schema", e))
}

fn create_index(conn: &Connection, config: &StoreConfig) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS \"{}\" ON \"{}\" (\"{}\");",
        config.index_name, config.table, config.key_column
    ))
    .map_err(|e| RuntimeError::store_with_source("failed to create unique key index", e))
}

/// Maps every Arrow field to a SQLite column type.
fn column_types(schema: &Schema) -> Result<Vec<(String, &'static str)>> {
    schema
        .fields()
        .iter()
        .map(|field| {
            validate_identifier("parquet column", field.name())?;
            Ok((field.name().clone(), sql_type(field.name(), field.data_type())?))
        })
        .collect()
}

fn sql_type(column: &str, data_type: &DataType) -> Result<&'static str> {
    match data_type {
        DataType::Boolean
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Ok("INTEGER"),
        DataType::Float32 | DataType::Float64 => Ok("REAL"),
        DataType::Utf8 | DataType::LargeUtf8 => Ok("TEXT"),
        DataType::Binary | DataType::LargeBinary => Ok("BLOB"),
        other => Err(RuntimeError::config(format!(
            "column '{column}' has type {other}, which has no keyed store mapping"
        ))),
    }
}

fn downcast<'a, T: 'static>(array: &'a dyn Array, column: &str) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        RuntimeError::dataset(column, "column data does not match its declared type")
    })
}

fn arrow_cell(array: &dyn Array, row: usize, column: &str) -> Result<SqlValue> {
    if array.is_null(row) {
        return Ok(SqlValue::Null);
    }

    let value = match array.data_type() {
        DataType::Boolean => {
            SqlValue::Integer(i64::from(downcast::<BooleanArray>(array, column)?.value(row)))
        }
        DataType::Int8 => SqlValue::Integer(downcast::<Int8Array>(array, column)?.value(row).into()),
        DataType::Int16 => {
            SqlValue::Integer(downcast::<Int16Array>(array, column)?.value(row).into())
        }
        DataType::Int32 => {
            SqlValue::Integer(downcast::<Int32Array>(array, column)?.value(row).into())
        }
        DataType::Int64 => SqlValue::Integer(downcast::<Int64Array>(array, column)?.value(row)),
        DataType::UInt8 => {
            SqlValue::Integer(downcast::<UInt8Array>(array, column)?.value(row).into())
        }
        DataType::UInt16 => {
            SqlValue::Integer(downcast::<UInt16Array>(array, column)?.value(row).into())
        }
        DataType::UInt32 => {
            SqlValue::Integer(downcast::<UInt32Array>(array, column)?.value(row).into())
        }
        DataType::UInt64 => {
            let v = downcast::<UInt64Array>(array, column)?.value(row);
            SqlValue::Integer(i64::try_from(v).map_err(|_| {
                RuntimeError::dataset(column, format!("value {v} overflows a SQLite integer"))
            })?)
        }
        DataType::Float32 => {
            SqlValue::Real(downcast::<Float32Array>(array, column)?.value(row).into())
        }
        DataType::Float64 => SqlValue::Real(downcast::<Float64Array>(array, column)?.value(row)),
        DataType::Utf8 => {
            SqlValue::Text(downcast::<StringArray>(array, column)?.value(row).to_string())
        }
        DataType::LargeUtf8 => {
            SqlValue::Text(downcast::<LargeStringArray>(array, column)?.value(row).to_string())
        }
        DataType::Binary => {
            SqlValue::Blob(downcast::<BinaryArray>(array, column)?.value(row).to_vec())
        }
        DataType::LargeBinary => {
            SqlValue::Blob(downcast::<LargeBinaryArray>(array, column)?.value(row).to_vec())
        }
        other => {
            return Err(RuntimeError::config(format!(
                "column '{column}' has type {other}, which has no keyed store mapping"
            )))
        }
    };
    Ok(value)
}
