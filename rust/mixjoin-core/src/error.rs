// rust/mixjoin-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Dataset '{name}' error: {message}")]
    Dataset {
        name: String,
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Shard record has no join key field '{field}'")]
    MissingKey {
        field: String,
    },

    #[error("Join key field '{field}' is not usable as a lookup key: {message}")]
    InvalidKey {
        field: String,
        message: String,
    },

    #[error("Join key {key} is present in the shards but missing from the keyed store")]
    JoinMiss {
        key: String,
    },

    #[error("Keyed store at '{path}' is unavailable: {message}")]
    StoreUnavailable {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Keyed store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Shard source '{path}' yields no records")]
    EmptyShardSource {
        path: PathBuf,
    },

    #[error("Collate error: {message}")]
    Collate {
        message: String,
    },

    #[error("Worker {worker_id} out of range (total workers: {num_workers})")]
    InvalidWorker {
        worker_id: u32,
        num_workers: u32,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error("Record has no field '{field}'")]
    MissingField {
        field: String,
    },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

// Convenience constructors
impl RuntimeError {

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn dataset(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dataset {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn missing_key(field: impl Into<String>) -> Self {
        Self::MissingKey { field: field.into() }
    }

    pub fn invalid_key(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKey {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn join_miss(key: impl std::fmt::Display) -> Self {
        Self::JoinMiss { key: key.to_string() }
    }

    pub fn store_unavailable(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: Option<rusqlite::Error>,
    ) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    pub fn store_with_source(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn empty_shard_source(path: impl Into<PathBuf>) -> Self {
        Self::EmptyShardSource { path: path.into() }
    }

    pub fn collate(message: impl Into<String>) -> Self {
        Self::Collate {
            message: message.into(),
        }
    }

    pub fn invalid_worker(worker_id: u32, num_workers: u32) -> Self {
        Self::InvalidWorker { worker_id, num_workers }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField { field: field.into() }
    }

    /// Whether this error means the joined data itself is inconsistent,
    /// as opposed to an I/O or setup failure.
    pub fn is_data_defect(&self) -> bool {
        matches!(
            self,
            Self::MissingKey { .. } | Self::InvalidKey { .. } | Self::JoinMiss { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_miss_message_names_key() {
        let err = RuntimeError::join_miss(3);
        assert_eq!(
            err.to_string(),
            "Join key 3 is present in the shards but missing from the keyed store"
        );
        assert!(err.is_data_defect());
    }

    #[test]
    fn test_store_unavailable_is_not_data_defect() {
        let err = RuntimeError::store_unavailable("data.sqlite", "no such table", None);
        assert!(err.to_string().contains("data.sqlite"));
        assert!(!err.is_data_defect());
    }
}
