//! Key-value bags passed between nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named values produced by one node and consumed by its downstream nodes.
///
/// Written by a single execution, then frozen behind an `Arc` once it is
/// attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBag {
  values: BTreeMap<String, serde_json::Value>,
}

impl DataBag {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a bag from a JSON object. Any other JSON value is stored under `"value"`.
  pub fn from_json(value: serde_json::Value) -> Self {
    match value {
      serde_json::Value::Object(map) => Self {
        values: map.into_iter().collect(),
      },
      serde_json::Value::Null => Self::default(),
      other => {
        let mut bag = Self::default();
        bag.insert("value", other);
        bag
      }
    }
  }

  pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
    self.values.insert(key.into(), value);
  }

  pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
    self.values.get(key)
  }

  /// Copy every entry of `other` into this bag, overwriting existing keys.
  pub fn extend_from(&mut self, other: &DataBag) {
    for (k, v) in &other.values {
      self.values.insert(k.clone(), v.clone());
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
    self.values.iter()
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::Value::Object(
      self
        .values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    )
  }
}

/// Per-execution input and output handed to a node executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionContext {
  pub input: DataBag,
  pub output: DataBag,
}

impl NodeExecutionContext {
  pub fn new(input: DataBag) -> Self {
    Self {
      input,
      output: DataBag::new(),
    }
  }
}
