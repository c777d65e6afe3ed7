// rust/mixjoin-core/src/dataset/collate.rs

//! Stacking joined records into training batches.

use serde::Serialize;
use serde_json::{Map, Value};

use super::record::Record;
use crate::error::{Result, RuntimeError};

/// One collated batch and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedBatch {
    /// Each field holds the per-record values, stacked in record order.
    pub fields: Record,
    /// Number of records stacked.
    pub len: usize,
    pub worker_id: u32,
    /// Position of this batch among the batches of its worker.
    pub batch_index: u64,
}

impl JoinedBatch {
    pub fn collate(records: &[Record], worker_id: u32, batch_index: u64) -> Result<Self> {
        Ok(Self {
            fields: collate(records)?,
            len: records.len(),
            worker_id,
            batch_index,
        })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Stacks records field by field.
///
/// Scalars become arrays of the per-record values, arrays (which must agree
/// in length) become arrays of arrays, and objects are collated recursively.
///
/// # Errors
///
/// Returns `Collate` for an empty batch, records with different field sets,
/// null values, or values of different kinds under one field.
pub fn collate(records: &[Record]) -> Result<Record> {
    let Some(first) = records.first() else {
        return Err(RuntimeError::collate("cannot collate an empty batch"));
    };

    let maps: Vec<&Map<String, Value>> = records.iter().map(Record::as_map).collect();
    check_same_fields(&maps, "record")?;
    Ok(Record::new(stack_maps(first.as_map(), &maps, "")?))
}

fn check_same_fields(maps: &[&Map<String, Value>], what: &str) -> Result<()> {
    let first = maps[0];
    for (i, map) in maps.iter().enumerate().skip(1) {
        let same = map.len() == first.len() && first.keys().all(|k| map.contains_key(k));
        if !same {
            let expected: Vec<&str> = first.keys().map(String::as_str).collect();
            let found: Vec<&str> = map.keys().map(String::as_str).collect();
            return Err(RuntimeError::collate(format!(
                "{what} {i} has fields {found:?}, expected {expected:?}"
            )));
        }
    }
    Ok(())
}

fn stack_maps(
    template: &Map<String, Value>,
    maps: &[&Map<String, Value>],
    prefix: &str,
) -> Result<Map<String, Value>> {
    let mut stacked = Map::with_capacity(template.len());
    for name in template.keys() {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        // Field sets were checked above, so every map has this key
        let values: Vec<&Value> = maps.iter().filter_map(|m| m.get(name)).collect();
        stacked.insert(name.clone(), stack(&values, &path)?);
    }
    Ok(stacked)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn stack(values: &[&Value], path: &str) -> Result<Value> {
    let first = values[0];
    for value in values {
        if value.is_null() {
            return Err(RuntimeError::collate(format!("field '{path}' contains null")));
        }
        if kind(value) != kind(first) {
            return Err(RuntimeError::collate(format!(
                "field '{path}' mixes {} and {} values",
                kind(first),
                kind(value)
            )));
        }
    }

    match first {
        Value::Array(head) => {
            if let Some(other) = values
                .iter()
                .filter_map(|v| v.as_array())
                .find(|a| a.len() != head.len())
            {
                return Err(RuntimeError::collate(format!(
                    "field '{path}' has arrays of length {} and {}",
                    head.len(),
                    other.len()
                )));
            }
            Ok(Value::Array(values.iter().map(|v| (*v).clone()).collect()))
        }
        Value::Object(head) => {
            let maps: Vec<&Map<String, Value>> =
                values.iter().filter_map(|v| v.as_object()).collect();
            check_same_fields(&maps, &format!("field '{path}' of record"))?;
            Ok(Value::Object(stack_maps(head, &maps, path)?))
        }
        _ => Ok(Value::Array(values.iter().map(|v| (*v).clone()).collect())),
    }
}
