use serde::{Deserialize, Serialize};

use crate::enums::JoinStrategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  /// Display name; falls back to `node_id`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default)]
  pub join: JoinStrategy,
  /// Discriminator selecting the executor registered under this name.
  pub executor: String,
  /// Executor-specific configuration, opaque to the engine.
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub config: serde_json::Value,
}

impl NodeDef {
  pub fn new(node_id: impl Into<String>, executor: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      name: None,
      join: JoinStrategy::Any,
      executor: executor.into(),
      config: serde_json::Value::Null,
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_join(mut self, join: JoinStrategy) -> Self {
    self.join = join;
    self
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    self.config = config;
    self
  }

  pub fn display_name(&self) -> &str {
    self.name.as_deref().unwrap_or(&self.node_id)
  }
}
