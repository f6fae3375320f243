//! Per-node lease-based inbox.
//!
//! A message is taken out with [`NodeQueue::try_lease`] or [`NodeQueue::lease`]
//! and stays outstanding until it is either completed or abandoned. Both
//! acknowledge a lease exactly once; a second acknowledgement is an error.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use switchyard_config::MessageKind;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::message::Message;

/// Default number of pending messages a queue holds before rejecting more.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error("queue for node '{node_id}' is full (capacity {capacity})")]
  Full { node_id: String, capacity: usize },

  #[error("lease {lease_id} on node '{node_id}' is not outstanding")]
  UnknownLease { node_id: String, lease_id: u64 },
}

/// A checked-out, not yet acknowledged message.
#[derive(Debug)]
pub struct Lease {
  id: u64,
  message: Message,
}

impl Lease {
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn message(&self) -> &Message {
    &self.message
  }
}

#[derive(Debug, Default)]
struct QueueState {
  pending: VecDeque<Message>,
  leased: HashSet<u64>,
  next_lease: u64,
}

/// Bounded, concurrency-safe inbox for a single node.
#[derive(Debug)]
pub struct NodeQueue {
  node_id: String,
  capacity: usize,
  state: Mutex<QueueState>,
  notify: Notify,
}

impl NodeQueue {
  pub fn new(node_id: impl Into<String>) -> Self {
    Self::with_capacity(node_id, DEFAULT_QUEUE_CAPACITY)
  }

  pub fn with_capacity(node_id: impl Into<String>, capacity: usize) -> Self {
    Self {
      node_id: node_id.into(),
      capacity,
      state: Mutex::new(QueueState::default()),
      notify: Notify::new(),
    }
  }

  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  /// Append a message, or reject it when the queue is at capacity.
  pub fn enqueue(&self, message: Message) -> Result<(), QueueError> {
    {
      let mut state = self.state.lock();
      if state.pending.len() >= self.capacity {
        return Err(QueueError::Full {
          node_id: self.node_id.clone(),
          capacity: self.capacity,
        });
      }
      state.pending.push_back(message);
    }
    self.notify.notify_one();
    Ok(())
  }

  /// Lease the head message without waiting.
  pub fn try_lease(&self) -> Option<Lease> {
    let mut state = self.state.lock();
    let message = state.pending.pop_front()?;
    let id = state.next_lease;
    state.next_lease += 1;
    state.leased.insert(id);
    Some(Lease { id, message })
  }

  /// Wait for a message and lease it.
  ///
  /// Returns `None` when `cancel` fires, or when the queue was signalled but
  /// another consumer already drained it.
  pub async fn lease(&self, cancel: &CancellationToken) -> Option<Lease> {
    if let Some(lease) = self.try_lease() {
      return Some(lease);
    }

    tokio::select! {
      _ = self.notify.notified() => self.try_lease(),
      _ = cancel.cancelled() => None,
    }
  }

  /// Acknowledge a leased message, removing it permanently.
  pub fn complete(&self, lease: &Lease) -> Result<(), QueueError> {
    self.release(lease)
  }

  /// Give up on a leased message. The message is dropped, not requeued.
  pub fn abandon(&self, lease: &Lease) -> Result<(), QueueError> {
    self.release(lease)?;
    warn!(
      node_id = %self.node_id,
      lease_id = lease.id,
      message_kind = %lease.message.kind(),
      source_node = %lease.message.source_node_id(),
      "leased message abandoned"
    );
    Ok(())
  }

  fn release(&self, lease: &Lease) -> Result<(), QueueError> {
    if self.state.lock().leased.remove(&lease.id) {
      Ok(())
    } else {
      Err(QueueError::UnknownLease {
        node_id: self.node_id.clone(),
        lease_id: lease.id,
      })
    }
  }

  /// Kind of the head message, if any.
  pub fn peek_kind(&self) -> Option<MessageKind> {
    self.state.lock().pending.front().map(Message::kind)
  }

  /// Number of pending (not leased) messages.
  pub fn len(&self) -> usize {
    self.state.lock().pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.state.lock().pending.is_empty()
  }

  /// Number of leases not yet acknowledged.
  pub fn in_flight(&self) -> usize {
    self.state.lock().leased.len()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use super::*;
  use crate::data::DataBag;

  fn msg(from: &str) -> Message {
    Message::complete(from, "instance", DataBag::new())
  }

  #[test]
  fn test_fifo_lease_and_complete() {
    let queue = NodeQueue::new("n");
    queue.enqueue(msg("a")).unwrap();
    queue.enqueue(msg("b")).unwrap();
    assert_eq!(queue.len(), 2);

    let first = queue.try_lease().unwrap();
    assert_eq!(first.message().source_node_id(), "a");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.in_flight(), 1);

    queue.complete(&first).unwrap();
    assert_eq!(queue.in_flight(), 0);

    let second = queue.try_lease().unwrap();
    assert_eq!(second.message().source_node_id(), "b");
    assert!(queue.try_lease().is_none());
  }

  #[test]
  fn test_each_lease_gets_its_own_id() {
    let queue = NodeQueue::new("inbox");
    assert_eq!(queue.node_id(), "inbox");
    queue.enqueue(msg("a")).unwrap();
    queue.enqueue(msg("b")).unwrap();

    let first = queue.try_lease().unwrap();
    let second = queue.try_lease().unwrap();
    assert_ne!(first.id(), second.id());

    queue.abandon(&second).unwrap();
    let err = queue.complete(&second).unwrap_err();
    assert!(matches!(
      err,
      QueueError::UnknownLease { ref node_id, lease_id } if node_id == "inbox" && lease_id == second.id()
    ));
    queue.complete(&first).unwrap();
    assert_eq!(queue.in_flight(), 0);
  }

  #[test]
  fn test_full_queue_rejects() {
    let queue = NodeQueue::with_capacity("n", 2);
    queue.enqueue(msg("a")).unwrap();
    queue.enqueue(msg("b")).unwrap();
    let err = queue.enqueue(msg("c")).unwrap_err();
    assert!(matches!(err, QueueError::Full { capacity: 2, .. }));
    assert_eq!(queue.len(), 2);
  }

  #[test]
  fn test_double_complete_is_error() {
    let queue = NodeQueue::new("n");
    queue.enqueue(msg("a")).unwrap();
    let lease = queue.try_lease().unwrap();

    queue.complete(&lease).unwrap();
    assert!(matches!(
      queue.complete(&lease),
      Err(QueueError::UnknownLease { .. })
    ));
    assert!(queue.is_empty());
    assert_eq!(queue.in_flight(), 0);
  }

  #[test]
  fn test_complete_after_abandon_is_error() {
    let queue = NodeQueue::new("n");
    queue.enqueue(msg("a")).unwrap();
    let lease = queue.try_lease().unwrap();

    queue.abandon(&lease).unwrap();
    assert!(queue.complete(&lease).is_err());
    // abandoned messages are dropped, not requeued
    assert!(queue.is_empty());
  }

  #[test]
  fn test_peek_kind() {
    let queue = NodeQueue::new("n");
    assert!(queue.peek_kind().is_none());
    queue
      .enqueue(Message::cancel("a", None, "upstream failed", true))
      .unwrap();
    assert_eq!(queue.peek_kind(), Some(MessageKind::Cancel));
  }

  #[tokio::test]
  async fn test_lease_waits_for_enqueue() {
    let queue = Arc::new(NodeQueue::new("n"));
    let cancel = CancellationToken::new();

    let waiter = {
      let queue = queue.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { queue.lease(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.enqueue(msg("late")).unwrap();

    let lease = waiter.await.unwrap().expect("lease after enqueue");
    assert_eq!(lease.message().source_node_id(), "late");
  }

  #[tokio::test]
  async fn test_lease_returns_none_on_cancel() {
    let queue = NodeQueue::new("n");
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(queue.lease(&cancel).await.is_none());
  }
}
