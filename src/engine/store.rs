// SPDX-License-Identifier: MIT

//! Shared key-value context threaded through node invocations

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a write combines with a value already present under the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Replace the existing value
    #[default]
    Overwrite,
    /// Push onto an array (arrays are extended element-wise)
    Append,
    /// Shallow-merge objects, new keys win
    Merge,
    /// Keep the larger number
    Max,
    /// Keep the smaller number
    Min,
}

/// Schema-free mapping from string keys to JSON values.
///
/// Keys iterate in sorted order so that anything derived from a store
/// (logs, merged results, serialized output) is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Store {
    fields: Map<String, Value>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a field as a string slice, if it holds a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Get a nested field value using dot notation (e.g., "result.intent")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Insert or overwrite a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Combine `value` with the current value of `key` using `strategy`
    pub fn update_with(&mut self, key: &str, value: Value, strategy: MergeStrategy) {
        match strategy {
            MergeStrategy::Overwrite => {
                self.fields.insert(key.to_string(), value);
            }
            MergeStrategy::Append => {
                let current = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Array(vec![]));
                if !current.is_array() {
                    let previous = current.take();
                    *current = Value::Array(vec![previous]);
                }
                if let Value::Array(items) = current {
                    match value {
                        Value::Array(new_items) => items.extend(new_items),
                        other => items.push(other),
                    }
                }
            }
            MergeStrategy::Max | MergeStrategy::Min => {
                let Some(new) = value.as_f64() else {
                    log::warn!("Ignoring non-numeric value for '{}' under {:?}", key, strategy);
                    return;
                };
                let replace = match self.fields.get(key).and_then(Value::as_f64) {
                    None => true,
                    Some(current) if strategy == MergeStrategy::Max => new > current,
                    Some(current) => new < current,
                };
                if replace {
                    self.fields.insert(key.to_string(), value);
                }
            }
            MergeStrategy::Merge => {
                let current = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Object(Map::new()));
                match (current, value) {
                    (Value::Object(current_obj), Value::Object(new_obj)) => {
                        for (k, v) in new_obj {
                            current_obj.insert(k, v);
                        }
                    }
                    (current, other) => *current = other,
                }
            }
        }
    }

    /// Convert the store to a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.fields)
    }

    /// Get all field names
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Store {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for Store {
    type Error = Value;

    /// Only JSON objects convert; anything else is handed back unchanged
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(other),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Store {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for Store {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
