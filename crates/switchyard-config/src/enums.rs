use std::fmt;

use serde::{Deserialize, Serialize};

/// How many upstream signals a node waits for before it executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
  /// Execute once per arriving message.
  #[default]
  Any,
  /// Execute once every distinct upstream node has signalled.
  All,
}

/// Kind of terminal message a node emits; also the trigger filter on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
  #[default]
  Complete,
  Fail,
  Cancel,
}

impl fmt::Display for MessageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MessageKind::Complete => f.write_str("complete"),
      MessageKind::Fail => f.write_str("fail"),
      MessageKind::Cancel => f.write_str("cancel"),
    }
  }
}
