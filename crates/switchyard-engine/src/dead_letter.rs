//! Collection point for messages that could not be delivered.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::message::Message;

/// A message the router failed to deliver.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
  pub source_node_id: String,
  pub target_node_id: String,
  pub message_kind: String,
  pub reason: String,
  /// When the message was produced.
  pub sent_at: DateTime<Utc>,
  /// When delivery was given up.
  pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DeadLetterSink {
  entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, message: &Message, target_node_id: &str, reason: impl Into<String>) {
    let letter = DeadLetter {
      source_node_id: message.source_node_id().to_string(),
      target_node_id: target_node_id.to_string(),
      message_kind: message.kind().to_string(),
      reason: reason.into(),
      sent_at: message.timestamp(),
      at: Utc::now(),
    };
    warn!(
      source_node = %letter.source_node_id,
      target_node = %letter.target_node_id,
      message_kind = %letter.message_kind,
      reason = %letter.reason,
      "message_dead_lettered"
    );
    self.entries.lock().push(letter);
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.lock().is_empty()
  }

  pub fn snapshot(&self) -> Vec<DeadLetter> {
    self.entries.lock().clone()
  }
}
