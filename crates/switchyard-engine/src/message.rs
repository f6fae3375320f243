//! Terminal messages exchanged between nodes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use switchyard_config::MessageKind;

use crate::data::DataBag;

/// Source id carried by the synthetic message that bootstraps an entry node.
pub const START_SOURCE: &str = "$start";

/// A message emitted by a node (or by the engine) and routed to downstream queues.
#[derive(Debug, Clone)]
pub enum Message {
  Complete {
    node_id: String,
    instance_id: String,
    timestamp: DateTime<Utc>,
    data: Arc<DataBag>,
    source_port: Option<String>,
  },
  Fail {
    node_id: String,
    instance_id: String,
    timestamp: DateTime<Utc>,
    error: String,
    fault: Option<String>,
  },
  Cancel {
    node_id: String,
    instance_id: Option<String>,
    timestamp: DateTime<Utc>,
    reason: String,
    cascade_from_failure: bool,
  },
}

impl Message {
  /// Synthetic Complete message used to trigger an entry node.
  pub fn start(run_id: &str, input: Arc<DataBag>) -> Self {
    Message::Complete {
      node_id: START_SOURCE.to_string(),
      instance_id: run_id.to_string(),
      timestamp: Utc::now(),
      data: input,
      source_port: None,
    }
  }

  pub fn complete(node_id: &str, instance_id: &str, data: DataBag) -> Self {
    Message::Complete {
      node_id: node_id.to_string(),
      instance_id: instance_id.to_string(),
      timestamp: Utc::now(),
      data: Arc::new(data),
      source_port: None,
    }
  }

  pub fn fail(node_id: &str, instance_id: &str, error: String, fault: Option<String>) -> Self {
    Message::Fail {
      node_id: node_id.to_string(),
      instance_id: instance_id.to_string(),
      timestamp: Utc::now(),
      error,
      fault,
    }
  }

  pub fn cancel(
    node_id: &str,
    instance_id: Option<String>,
    reason: impl Into<String>,
    cascade_from_failure: bool,
  ) -> Self {
    Message::Cancel {
      node_id: node_id.to_string(),
      instance_id,
      timestamp: Utc::now(),
      reason: reason.into(),
      cascade_from_failure,
    }
  }

  /// ID of the node that produced this message.
  pub fn source_node_id(&self) -> &str {
    match self {
      Message::Complete { node_id, .. }
      | Message::Fail { node_id, .. }
      | Message::Cancel { node_id, .. } => node_id,
    }
  }

  pub fn kind(&self) -> MessageKind {
    match self {
      Message::Complete { .. } => MessageKind::Complete,
      Message::Fail { .. } => MessageKind::Fail,
      Message::Cancel { .. } => MessageKind::Cancel,
    }
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    match self {
      Message::Complete { timestamp, .. }
      | Message::Fail { timestamp, .. }
      | Message::Cancel { timestamp, .. } => *timestamp,
    }
  }

  /// True for the engine's synthetic entry trigger.
  pub fn is_start(&self) -> bool {
    matches!(self, Message::Complete { node_id, .. } if node_id == START_SOURCE)
  }

  /// Input bag a receiving node sees for this message.
  pub fn to_input(&self) -> DataBag {
    match self {
      Message::Complete { data, .. } => data.as_ref().clone(),
      Message::Fail {
        node_id, error, ..
      } => {
        let mut input = DataBag::new();
        input.insert("error", serde_json::Value::String(error.clone()));
        input.insert("failed_node", serde_json::Value::String(node_id.clone()));
        input
      }
      Message::Cancel { .. } => DataBag::new(),
    }
  }

  /// Whether a connection with trigger filter `on` carries this message.
  ///
  /// Cancels travel the success path as well, so a failure quiesces everything
  /// that would otherwise have waited on the failed node.
  pub fn travels_on(&self, on: MessageKind) -> bool {
    match self.kind() {
      MessageKind::Complete => on == MessageKind::Complete,
      MessageKind::Fail => on == MessageKind::Fail,
      MessageKind::Cancel => matches!(on, MessageKind::Complete | MessageKind::Cancel),
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_start_message() {
    let msg = Message::start("run-1", Arc::new(DataBag::new()));
    assert!(msg.is_start());
    assert_eq!(msg.kind(), MessageKind::Complete);
    assert!(!Message::complete("a", "i", DataBag::new()).is_start());
  }

  #[test]
  fn test_fail_input_carries_error() {
    let msg = Message::fail("a", "i", "boom".to_string(), None);
    let input = msg.to_input();
    assert_eq!(input.get("error"), Some(&json!("boom")));
    assert_eq!(input.get("failed_node"), Some(&json!("a")));
  }

  #[test]
  fn test_travels_on() {
    let complete = Message::complete("a", "i", DataBag::new());
    let fail = Message::fail("a", "i", "x".to_string(), None);
    let cancel = Message::cancel("a", None, "x", true);

    assert!(complete.travels_on(MessageKind::Complete));
    assert!(!complete.travels_on(MessageKind::Fail));
    assert!(fail.travels_on(MessageKind::Fail));
    assert!(!fail.travels_on(MessageKind::Complete));
    assert!(cancel.travels_on(MessageKind::Complete));
    assert!(cancel.travels_on(MessageKind::Cancel));
    assert!(!cancel.travels_on(MessageKind::Fail));
  }
}
