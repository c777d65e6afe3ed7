// rust/mixjoin-core/src/dataset/record.rs

use std::ops::Index;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, RuntimeError};

/// A read-only joined record.
///
/// Fields keep the order they were merged in: shard fields first, then any
/// store columns not already present. Values from the store win when both
/// sources carry the same field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Merges a shard record with its keyed-store row.
    pub fn merge(shard: Map<String, Value>, row: Map<String, Value>) -> Self {
        let mut fields = shard;
        for (name, value) in row {
            fields.insert(name, value);
        }
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Deserializes one field into `T`.
    pub fn field<T: DeserializeOwned>(&self, field: &str) -> Result<T> {
        let value = self
            .fields
            .get(field)
            .ok_or_else(|| RuntimeError::missing_field(field))?;
        T::deserialize(value).map_err(|e| {
            RuntimeError::serialization(format!("field '{field}' has an unexpected type: {e}"))
        })
    }

    /// Deserializes the whole record into `T`, mapping fields by name.
    ///
    /// ```
    /// # use mixjoin_core::Record;
    /// # use serde_json::json;
    /// #[derive(serde::Deserialize)]
    /// struct Sample {
    ///     id: i64,
    ///     name: String,
    /// }
    ///
    /// let record = Record::new(json!({"id": 1, "name": "a"}).as_object().unwrap().clone());
    /// let sample: Sample = record.decode().unwrap();
    /// assert_eq!(sample.id, 1);
    /// assert_eq!(sample.name, "a");
    /// ```
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| RuntimeError::serialization(format!("failed to decode record: {e}")))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

impl Index<&str> for Record {
    type Output = Value;

    /// # Panics
    ///
    /// Panics if the field is absent.
    fn index(&self, field: &str) -> &Value {
        match self.fields.get(field) {
            Some(value) => value,
            None => panic!("record has no field '{field}'"),
        }
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = serde_json::map::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
