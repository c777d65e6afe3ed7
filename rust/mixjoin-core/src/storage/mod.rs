// rust/mixjoin-core/src/storage/mod.rs

//! File access for shard directories.
//!
//! Shard readers and writers go through the [`StorageBackend`] trait so the
//! record pipeline does not care where shard bytes live. The only backend is
//! [`LocalStorage`], rooted at a shard directory.
//!
//! # Example
//!
//! ```no_run
//! use mixjoin_core::config::StorageConfig;
//! use mixjoin_core::storage::{LocalStorage, StorageBackend};
//! use std::io::Write;
//! use std::path::Path;
//!
//! let storage = LocalStorage::new("data", &StorageConfig::default()).unwrap();
//!
//! let mut writer = storage.open_write(Path::new("notes.txt")).unwrap();
//! writer.write_all(b"hello").unwrap();
//! writer.finish().unwrap();
//!
//! let mut reader = storage.open_read(Path::new("notes.txt")).unwrap();
//! assert_eq!(reader.read_all().unwrap(), b"hello");
//! ```

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{StorageBackend, StorageReader, StorageWriter};
