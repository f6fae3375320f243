//! Execution events and notifiers for observability.
//!
//! Events are emitted during a run to allow consumers to observe progress,
//! stream to UIs, etc. They are fire-and-forget: a slow, missing, or panicking
//! notifier never changes how the run is dispatched.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::error;

use crate::run::RunStatus;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A run has been set up and its entry nodes triggered.
  RunStarted { run_id: String, workflow_id: String },

  /// A node has started executing.
  NodeStarted {
    run_id: String,
    node_id: String,
    instance_id: String,
  },

  /// A node has completed successfully.
  NodeCompleted {
    run_id: String,
    node_id: String,
    instance_id: String,
    duration_ms: u64,
  },

  /// A node has failed, either by reporting failure or by faulting.
  NodeFailed {
    run_id: String,
    node_id: String,
    instance_id: String,
    error: String,
  },

  /// A node was cancelled before it could run (or while it was running).
  NodeCancelled {
    run_id: String,
    node_id: String,
    instance_id: String,
    reason: String,
  },

  /// A run reached its final status.
  RunFinished { run_id: String, status: RunStatus },
}

/// Trait for receiving execution events.
///
/// Implement this trait to receive events during workflow execution.
/// The engine calls `notify` after each state transition - implementations
/// decide what to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
///
/// Useful for tests or when event observation is not needed.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Use this when you need to consume events asynchronously (e.g., persist
/// to a database, drive a progress view, etc.).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never blocks dispatch. Volume is a handful
  // of events per node execution.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  /// Create a new channel notifier.
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self { sender }, receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// The registered notifiers of an engine.
#[derive(Clone, Default)]
pub(crate) struct Notifiers {
  notifiers: Vec<Arc<dyn ExecutionNotifier>>,
}

impl Notifiers {
  pub(crate) fn push(&mut self, notifier: Arc<dyn ExecutionNotifier>) {
    self.notifiers.push(notifier);
  }

  /// Deliver an event to every notifier, isolating panics.
  pub(crate) fn emit(&self, event: ExecutionEvent) {
    for notifier in &self.notifiers {
      let event = event.clone();
      if catch_unwind(AssertUnwindSafe(|| notifier.notify(event))).is_err() {
        error!("execution notifier panicked; event dropped");
      }
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.notifiers.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Panicking;

  impl ExecutionNotifier for Panicking {
    fn notify(&self, _event: ExecutionEvent) {
      panic!("observer bug");
    }
  }

  #[test]
  fn test_panicking_notifier_does_not_stop_delivery() {
    let (channel, mut rx) = ChannelNotifier::channel();
    let mut notifiers = Notifiers::default();
    notifiers.push(Arc::new(Panicking));
    notifiers.push(Arc::new(channel));
    assert_eq!(notifiers.len(), 2);

    notifiers.emit(ExecutionEvent::RunStarted {
      run_id: "r".to_string(),
      workflow_id: "w".to_string(),
    });

    assert!(matches!(
      rx.try_recv(),
      Ok(ExecutionEvent::RunStarted { .. })
    ));
  }

  #[test]
  fn test_channel_notifier_ignores_dropped_receiver() {
    let (channel, rx) = ChannelNotifier::channel();
    drop(rx);
    channel.notify(ExecutionEvent::RunFinished {
      run_id: "r".to_string(),
      status: RunStatus::Completed,
    });
  }
}
