//! A small self-describing value model used as the normalized in-memory
//! shape for every decoded payload, regardless of which wire format
//! produced it.
//!
//! Distinguishing `Keyword` from `Str` and `Set` from `Array` is what lets
//! the lossless formats (`edn`, `transit`) round-trip exactly while the
//! lossy `json` format is free to collapse both distinctions away.

use std::collections::HashMap;

/// A decoded payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    /// A namespaced-symbol-like atom, e.g. EDN's `:foo/bar`. Collapses to
    /// a plain string under the lossy JSON format.
    Keyword(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// An unordered, duplicate-free collection. Collapses to an array
    /// under the lossy JSON format.
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn keyword(s: impl Into<String>) -> Self {
        Self::Keyword(s.into())
    }

    #[must_use]
    pub fn map_from(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self::Map(entries.into_iter().collect())
    }

    /// Convenience lookup for `Map` values keyed by string/keyword.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
                Value::Str(s) | Value::Keyword(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Keyword(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(m: HashMap<String, Value>) -> Self {
        Value::Map(m.into_iter().map(|(k, v)| (Value::Str(k), v)).collect())
    }
}
