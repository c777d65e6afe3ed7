// rust/mixjoin-core/src/store/mod.rs

//! The keyed tabular store.
//!
//! The store is a SQLite table with a unique index on its key column,
//! materialized once by [`etl::materialize`]. During training it is only read.
//! Every consumer opens its own [`StoreReader`]: one read-only connection that
//! is `Send` but not `Sync`, so a handle can move into a worker thread but can
//! never be shared between threads.

pub mod etl;
mod value;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rusqlite::{params, Connection, OpenFlags};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{validate_identifier, StoreConfig};
use crate::error::{Result, RuntimeError};

pub use etl::{materialize, EtlReport};
pub use value::{key_param, sql_to_json};

/// Location and layout of a materialized keyed store.
///
/// Holds no connection itself; connections are opened per reader.
#[derive(Debug, Clone)]
pub struct KeyedStore {
    path: PathBuf,
    table: String,
    key_column: String,
    open_readers: Arc<AtomicUsize>,
}

impl KeyedStore {
    pub fn new(path: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        validate_identifier("store.table", &config.table)?;
        validate_identifier("store.key_column", &config.key_column)?;

        Ok(Self {
            path: path.into(),
            table: config.table.clone(),
            key_column: config.key_column.clone(),
            open_readers: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Number of reader handles currently open against this store.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    /// Opens a private read-only handle.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the file does not exist, cannot be
    /// opened, or lacks the table or key column (the ETL step has not run).
    pub fn open_reader(&self) -> Result<StoreReader> {
        if !self.path.exists() {
            return Err(RuntimeError::store_unavailable(
                &self.path,
                "store file does not exist; run the prepare step first",
                None,
            ));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(|e| {
            RuntimeError::store_unavailable(&self.path, "failed to open store read-only", Some(e))
        })?;

        let sql = format!(
            "SELECT * FROM \"{}\" WHERE \"{}\" = ?1 LIMIT 2",
            self.table, self.key_column
        );
        // Preparing up front surfaces a missing table before the first lookup
        // and warms the statement cache.
        conn.prepare_cached(&sql).map_err(|e| {
            RuntimeError::store_unavailable(
                &self.path,
                format!("table '{}' with key '{}' is not readable", self.table, self.key_column),
                Some(e),
            )
        })?;

        let handles = self.open_readers.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(store = %self.path.display(), open_readers = handles, "opened reader handle");

        Ok(StoreReader {
            conn,
            sql,
            path: self.path.clone(),
            table: self.table.clone(),
            key_column: self.key_column.clone(),
            open_readers: self.open_readers.clone(),
            lookups: 0,
        })
    }

    /// Opens and immediately releases a reader, returning the row count.
    pub fn check_available(&self) -> Result<u64> {
        self.open_reader()?.row_count()
    }
}

/// A private read-only connection into a [`KeyedStore`].
///
/// Released when dropped.
pub struct StoreReader {
    conn: Connection,
    sql: String,
    path: PathBuf,
    table: String,
    key_column: String,
    open_readers: Arc<AtomicUsize>,
    lookups: u64,
}

impl StoreReader {
    /// Looks up the row for `key`.
    ///
    /// Returns `Ok(None)` if no row matches.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidKey` for non-scalar keys and with a `Store` error
    /// if more than one row matches, which means the uniqueness invariant of
    /// the table is broken.
    pub fn lookup(&mut self, key: &Value) -> Result<Option<Map<String, Value>>> {
        let param = key_param(&self.key_column, key)?;
        self.lookups += 1;

        let mut stmt = self
            .conn
            .prepare_cached(&self.sql)
            .map_err(|e| RuntimeError::store_with_source("failed to prepare lookup", e))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt
            .query(params![param])
            .map_err(|e| RuntimeError::store_with_source(format!("lookup of key {key} failed"), e))?;

        let first = match rows
            .next()
            .map_err(|e| RuntimeError::store_with_source(format!("lookup of key {key} failed"), e))?
        {
            Some(row) => value::row_to_map(row, &columns)?,
            None => return Ok(None),
        };

        let duplicate = rows
            .next()
            .map_err(|e| RuntimeError::store_with_source(format!("lookup of key {key} failed"), e))?
            .is_some();
        if duplicate {
            return Err(RuntimeError::store(format!(
                "key {key} matches more than one row in '{}'",
                self.path.display()
            )));
        }

        Ok(Some(first))
    }

    /// Looks up the row for `key`, failing with `JoinMiss` if there is none.
    pub fn get(&mut self, key: &Value) -> Result<Map<String, Value>> {
        self.lookup(key)?.ok_or_else(|| RuntimeError::join_miss(key))
    }

    pub fn row_count(&self) -> Result<u64> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{}\"", self.table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(|e| RuntimeError::store_with_source("failed to count rows", e))
    }

    /// Lookups issued through this handle.
    pub fn lookups(&self) -> u64 {
        self.lookups
    }
}

impl Drop for StoreReader {
    fn drop(&mut self) {
        let remaining = self.open_readers.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(
            store = %self.path.display(),
            lookups = self.lookups,
            open_readers = remaining,
            "closed reader handle"
        );
    }
}
