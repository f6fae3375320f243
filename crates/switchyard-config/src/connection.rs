use serde::{Deserialize, Serialize};

use crate::enums::MessageKind;

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDef {
  pub from: String,
  pub to: String,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  /// Message kind that travels along this connection.
  #[serde(default)]
  pub on: MessageKind,
}

fn default_enabled() -> bool {
  true
}

impl ConnectionDef {
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      enabled: true,
      on: MessageKind::Complete,
    }
  }

  pub fn on(mut self, kind: MessageKind) -> Self {
    self.on = kind;
    self
  }

  pub fn disabled(mut self) -> Self {
    self.enabled = false;
    self
  }
}
