//! Lossy key-value format (JSON-equivalent).
//!
//! Loss is restricted to: keyword -> string, set -> array, and distinct
//! integer types (`Int`/`UInt`) collapsing into a single JSON number type,
//! per spec §4.1.

use crate::error::{DecodeError, EncodeError};
use crate::value::Value;

use super::WireFormat;

pub struct JsonFormat;

impl WireFormat for JsonFormat {
    fn id(&self) -> &'static str {
        "json"
    }

    fn display_name(&self) -> &'static str {
        "JSON"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn is_binary(&self) -> bool {
        false
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let json = to_json(value);
        serde_json::to_vec(&json).map_err(|e| EncodeError {
            format: self.id(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        let json: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| DecodeError {
            format: self.id(),
            reason: e.to_string(),
            raw: bytes.to_vec(),
        })?;
        Ok(from_json(&json))
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number((*n).into()),
        Value::UInt(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) | Value::Keyword(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::Array(
            b.iter()
                .map(|byte| serde_json::Value::Number((*byte).into()))
                .collect(),
        ),
        Value::Array(items) | Value::Set(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect())
        }
        Value::Map(entries) => {
            let mut map = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = k.as_str().map(str::to_owned).unwrap_or_else(|| format!("{k:?}"));
                map.insert(key, to_json(v));
            }
            serde_json::Value::Object(map)
        }
    }
}

fn from_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::Str(k.clone()), from_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_values() {
        let fmt = JsonFormat;
        let value = Value::map_from([
            (Value::str("a"), Value::Int(-3)),
            (Value::str("b"), Value::Str("hi".into())),
        ]);
        let bytes = fmt.encode(&value).unwrap();
        let back = fmt.decode(&bytes).unwrap();
        assert_eq!(back.get("a"), Some(&Value::Int(-3)));
        assert_eq!(back.get("b"), Some(&Value::str("hi")));
    }

    #[test]
    fn keyword_collapses_to_string() {
        let fmt = JsonFormat;
        let bytes = fmt.encode(&Value::keyword("news")).unwrap();
        assert_eq!(fmt.decode(&bytes).unwrap(), Value::str("news"));
    }

    #[test]
    fn set_collapses_to_array() {
        let fmt = JsonFormat;
        let bytes = fmt
            .encode(&Value::Set(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        assert_eq!(
            fmt.decode(&bytes).unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn decode_error_carries_raw_bytes() {
        let fmt = JsonFormat;
        let err = fmt.decode(b"not json").unwrap_err();
        assert_eq!(err.raw, b"not json");
    }
}
