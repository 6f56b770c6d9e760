use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A flat event document keyed by dotted field names (`event.action`,
/// `user.id`, ...). Keys stay sorted, which keeps emitted payloads stable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any existing value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let _ = self.fields.insert(key.into(), value.into());
    }

    /// Appends a string to `key`. An existing string value is promoted to a
    /// list; an existing list of strings is extended; anything else is
    /// replaced by a fresh single-element list.
    pub fn append_str(&mut self, key: &str, value: &str) {
        let entry = self.fields.remove(key);
        let next = match entry {
            Some(Value::String(existing)) => {
                Value::Array(vec![Value::String(existing), Value::String(value.to_owned())])
            }
            Some(Value::Array(mut items)) if items.iter().all(Value::is_string) => {
                items.push(Value::String(value.to_owned()));
                Value::Array(items)
            }
            _ => Value::Array(vec![Value::String(value.to_owned())]),
        };
        let _ = self.fields.insert(key.to_owned(), next);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}
