//! NLQ query document model
//!
//! A search query is an untyped tree in the search engine's JSON DSL. It is
//! modelled here as a tagged recursive variant instead of a dynamic map so
//! that the validator's descent over it is exhaustive. Objects keep key
//! insertion order, which is the order issues are reported in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use std::fmt;

mod export;
mod parse;

pub use export::{export, export_to_file, ExportError, ExportFormat};
pub use parse::InputFormatError;

/// Ordered object body of a [`Query`] node
pub type Object = IndexMap<String, Query>;

/// Query document node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Query {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Query>),
    Object(Object),
}

impl Query {
    /// Build an object node from key/value pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Query)>,
    {
        Query::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Query::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Query]> {
        match self {
            Query::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Query::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Query::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Query::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Query::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Query::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Member lookup on object nodes
    pub fn get(&self, key: &str) -> Option<&Query> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Short name of the node's variant, used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Query::Null => "null",
            Query::Bool(_) => "boolean",
            Query::Number(_) => "number",
            Query::String(_) => "string",
            Query::Array(_) => "array",
            Query::Object(_) => "object",
        }
    }

    /// Convert to a `serde_json::Value` (preserving key order)
    pub fn to_json(&self) -> Value {
        match self {
            Query::Null => Value::Null,
            Query::Bool(b) => Value::Bool(*b),
            Query::Number(n) => Value::Number(n.clone()),
            Query::String(s) => Value::String(s.clone()),
            Query::Array(items) => Value::Array(items.iter().map(Query::to_json).collect()),
            Query::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Pretty-printed JSON text
    pub fn to_pretty_string(&self) -> String {
        format!("{:#}", self.to_json())
    }

    /// Calculate fingerprint (SHA-256 of the compact JSON form)
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl From<Value> for Query {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Query::Null,
            Value::Bool(b) => Query::Bool(b),
            Value::Number(n) => Query::Number(n),
            Value::String(s) => Query::String(s),
            Value::Array(items) => Query::Array(items.into_iter().map(Query::from).collect()),
            Value::Object(map) => Query::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Query::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Query> for Value {
    fn from(query: Query) -> Self {
        query.to_json()
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::String(s.to_string())
    }
}

impl From<i64> for Query {
    fn from(n: i64) -> Self {
        Query::Number(n.into())
    }
}

impl From<bool> for Query {
    fn from(b: bool) -> Self {
        Query::Bool(b)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
