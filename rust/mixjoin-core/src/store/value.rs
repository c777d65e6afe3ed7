// rust/mixjoin-core/src/store/value.rs

//! Conversions between JSON shard values and SQLite values.

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};

use crate::error::{Result, RuntimeError};

/// Converts a join key taken from a shard record into a lookup parameter.
///
/// Only scalars can be keys: integers, floats, strings and booleans
/// (booleans follow SQLite's 0/1 convention).
pub fn key_param(field: &str, key: &Value) -> Result<SqlValue> {
    match key {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if n.is_u64() {
                Err(RuntimeError::invalid_key(
                    field,
                    format!("{n} does not fit in a 64-bit signed integer"),
                ))
            } else {
                n.as_f64()
                    .map(SqlValue::Real)
                    .ok_or_else(|| RuntimeError::invalid_key(field, format!("{n} is not finite")))
            }
        }
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Null => Err(RuntimeError::invalid_key(field, "key is null")),
        Value::Array(_) | Value::Object(_) => Err(RuntimeError::invalid_key(
            field,
            "key must be a scalar, not an array or object",
        )),
    }
}

/// Converts one SQLite cell into JSON.
///
/// Non-finite reals become null, since JSON cannot represent them. Blobs
/// become arrays of byte values.
pub fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|&b| Value::from(b)).collect()),
    }
}

/// Builds a JSON object from a result row, in column order.
pub fn row_to_map(row: &rusqlite::Row<'_>, columns: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let cell = row
            .get_ref(i)
            .map_err(|e| RuntimeError::store_with_source(format!("failed to read column '{column}'"), e))?;
        map.insert(column.clone(), sql_to_json(cell));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_param_scalars() {
        assert_eq!(key_param("id", &json!(42)).unwrap(), SqlValue::Integer(42));
        assert_eq!(key_param("id", &json!(-1)).unwrap(), SqlValue::Integer(-1));
        assert_eq!(key_param("id", &json!(1.5)).unwrap(), SqlValue::Real(1.5));
        assert_eq!(
            key_param("id", &json!("abc")).unwrap(),
            SqlValue::Text("abc".to_string())
        );
        assert_eq!(key_param("id", &json!(true)).unwrap(), SqlValue::Integer(1));
    }

    #[test]
    fn test_key_param_rejects_non_scalars() {
        for bad in [json!(null), json!([1]), json!({"a": 1}), json!(u64::MAX)] {
            let err = key_param("id", &bad).unwrap_err();
            assert!(matches!(err, RuntimeError::InvalidKey { .. }), "{bad}");
        }
    }

    #[test]
    fn test_sql_to_json() {
        assert_eq!(sql_to_json(ValueRef::Null), Value::Null);
        assert_eq!(sql_to_json(ValueRef::Integer(7)), json!(7));
        assert_eq!(sql_to_json(ValueRef::Real(0.25)), json!(0.25));
        assert_eq!(sql_to_json(ValueRef::Real(f64::NAN)), Value::Null);
        assert_eq!(sql_to_json(ValueRef::Text(b"a")), json!("a"));
        assert_eq!(sql_to_json(ValueRef::Blob(&[1, 2])), json!([1, 2]));
    }
}
