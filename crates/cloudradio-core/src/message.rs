//! Flowgraph messages.
//!
//! Blocks exchange asynchronous messages alongside the sample streams. The
//! structure is generic (scalars, symbols, byte blobs, lists and
//! string-keyed dictionaries) and travels over Event Hub as JSON.
//!
//! JSON mapping:
//!
//! | Message        | JSON                |
//! |----------------|---------------------|
//! | `Null`         | `null`              |
//! | `Bool`         | `true` / `false`    |
//! | `Int`          | integer number      |
//! | `Float`        | non-integer number  |
//! | `Symbol`       | string              |
//! | `Blob`         | array of integers   |
//! | `List`         | array               |
//! | `Dict`         | object              |
//!
//! Arrays always decode as `List`; a blob sent out comes back as a list of
//! integers.

use std::collections::BTreeMap;

use serde_json::{Number, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Symbol(String),
    Blob(Vec<u8>),
    List(Vec<Message>),
    Dict(BTreeMap<String, Message>),
}

impl Message {
    pub fn to_json(&self) -> Result<Value> {
        Ok(match self {
            Message::Null => Value::Null,
            Message::Bool(b) => Value::Bool(*b),
            Message::Int(i) => Value::Number((*i).into()),
            Message::Float(f) => Value::Number(
                Number::from_f64(*f)
                    .ok_or_else(|| Error::Message(format!("{} has no JSON representation", f)))?,
            ),
            Message::Symbol(s) => Value::String(s.clone()),
            Message::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            Message::List(items) => {
                Value::Array(items.iter().map(Message::to_json).collect::<Result<_>>()?)
            }
            Message::Dict(map) => {
                let mut obj = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json()?);
                }
                Value::Object(obj)
            }
        })
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::Null => Message::Null,
            Value::Bool(b) => Message::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Message::Int(i),
                None => Message::Float(n.as_f64().ok_or_else(|| {
                    Error::Message(format!("number {} is out of range", n))
                })?),
            },
            Value::String(s) => Message::Symbol(s.clone()),
            Value::Array(items) => {
                Message::List(items.iter().map(Message::from_json).collect::<Result<_>>()?)
            }
            Value::Object(obj) => {
                let mut map = BTreeMap::new();
                for (k, v) in obj {
                    map.insert(k.clone(), Message::from_json(v)?);
                }
                Message::Dict(map)
            }
        })
    }

    /// Serialize to a JSON byte payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_json()?)?)
    }

    /// Parse the first JSON document in `body`. Trailing content is ignored.
    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        let mut docs = serde_json::Deserializer::from_slice(body).into_iter::<Value>();
        match docs.next() {
            Some(doc) => Message::from_json(&doc?),
            None => Err(Error::Message("empty message body".to_string())),
        }
    }

    pub fn dict<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Message)>,
        K: Into<String>,
    {
        Message::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Symbol(s.to_string())
    }
}

impl From<i64> for Message {
    fn from(i: i64) -> Self {
        Message::Int(i)
    }
}

impl From<f64> for Message {
    fn from(f: f64) -> Self {
        Message::Float(f)
    }
}

impl From<bool> for Message {
    fn from(b: bool) -> Self {
        Message::Bool(b)
    }
}
