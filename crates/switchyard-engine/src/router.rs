//! Fan-out of terminal messages along the static connection table.

use std::collections::HashMap;
use std::sync::Arc;

use switchyard_config::MessageKind;
use switchyard_workflow::Workflow;
use tracing::debug;

use crate::dead_letter::DeadLetterSink;
use crate::message::Message;
use crate::queue::NodeQueue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
  pub target: String,
  pub on: MessageKind,
}

/// Routes a node's terminal message onto the queues of its downstream nodes.
#[derive(Debug, Clone, Default)]
pub struct MessageRouter {
  routes: HashMap<String, Vec<Route>>,
}

impl MessageRouter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build the routing table from every enabled connection of a workflow.
  pub fn from_workflow(workflow: &Workflow) -> Self {
    let mut router = Self::new();
    for node in workflow.nodes() {
      for edge in workflow.graph().downstream(&node.node_id) {
        router.add_route(&node.node_id, &edge.target, edge.on);
      }
    }
    router
  }

  pub fn add_route(&mut self, source: &str, target: &str, on: MessageKind) {
    self
      .routes
      .entry(source.to_string())
      .or_default()
      .push(Route {
        target: target.to_string(),
        on,
      });
  }

  pub fn routes(&self, source: &str) -> &[Route] {
    self
      .routes
      .get(source)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Enqueue a copy of `message` on every target whose connection carries it.
  ///
  /// All copies are enqueued before this returns. A target without a queue, or
  /// whose queue rejects the message, goes to `dead_letters` instead. Returns
  /// the number of successful deliveries.
  pub fn route(
    &self,
    message: &Message,
    queues: &HashMap<String, Arc<NodeQueue>>,
    dead_letters: &DeadLetterSink,
  ) -> usize {
    let source = message.source_node_id();
    let mut delivered = 0;

    for route in self.routes(source) {
      if !message.travels_on(route.on) {
        continue;
      }

      let Some(queue) = queues.get(&route.target) else {
        dead_letters.push(message, &route.target, "no queue registered for target");
        continue;
      };

      match queue.enqueue(message.clone()) {
        Ok(()) => {
          debug!(
            source_node = %source,
            target_node = %route.target,
            message_kind = %message.kind(),
            "message_routed"
          );
          delivered += 1;
        }
        Err(e) => dead_letters.push(message, &route.target, e.to_string()),
      }
    }

    delivered
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::DataBag;

  fn queues(ids: &[&str], capacity: usize) -> HashMap<String, Arc<NodeQueue>> {
    ids
      .iter()
      .map(|id| {
        (
          id.to_string(),
          Arc::new(NodeQueue::with_capacity(*id, capacity)),
        )
      })
      .collect()
  }

  #[test]
  fn test_fan_out_to_all_matching_targets() {
    let mut router = MessageRouter::new();
    router.add_route("a", "b", MessageKind::Complete);
    router.add_route("a", "c", MessageKind::Complete);
    router.add_route("a", "handler", MessageKind::Fail);

    let queues = queues(&["b", "c", "handler"], 10);
    let sink = DeadLetterSink::new();

    let delivered = router.route(&Message::complete("a", "i", DataBag::new()), &queues, &sink);
    assert_eq!(delivered, 2);
    assert_eq!(queues["b"].len(), 1);
    assert_eq!(queues["c"].len(), 1);
    assert_eq!(queues["handler"].len(), 0);

    let delivered = router.route(
      &Message::fail("a", "i", "boom".to_string(), None),
      &queues,
      &sink,
    );
    assert_eq!(delivered, 1);
    assert_eq!(queues["handler"].len(), 1);
    assert!(sink.is_empty());
  }

  #[test]
  fn test_cancel_follows_complete_and_cancel_routes() {
    let mut router = MessageRouter::new();
    router.add_route("a", "b", MessageKind::Complete);
    router.add_route("a", "c", MessageKind::Cancel);
    router.add_route("a", "d", MessageKind::Fail);

    let queues = queues(&["b", "c", "d"], 10);
    let sink = DeadLetterSink::new();

    let delivered = router.route(&Message::cancel("a", None, "x", true), &queues, &sink);
    assert_eq!(delivered, 2);
    assert_eq!(queues["d"].len(), 0);
  }

  #[test]
  fn test_missing_queue_goes_to_dead_letters() {
    let mut router = MessageRouter::new();
    router.add_route("a", "ghost", MessageKind::Complete);
    router.add_route("a", "b", MessageKind::Complete);

    let queues = queues(&["b"], 10);
    let sink = DeadLetterSink::new();

    let delivered = router.route(&Message::complete("a", "i", DataBag::new()), &queues, &sink);
    assert_eq!(delivered, 1);
    let letters = sink.snapshot();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].target_node_id, "ghost");
    assert_eq!(letters[0].message_kind, "complete");
  }

  #[test]
  fn test_full_queue_goes_to_dead_letters() {
    let mut router = MessageRouter::new();
    router.add_route("a", "b", MessageKind::Complete);

    let queues = queues(&["b"], 1);
    let sink = DeadLetterSink::new();

    router.route(&Message::complete("a", "1", DataBag::new()), &queues, &sink);
    router.route(&Message::complete("a", "2", DataBag::new()), &queues, &sink);

    assert_eq!(queues["b"].len(), 1);
    assert_eq!(sink.len(), 1);
  }

  #[test]
  fn test_unknown_source_routes_nowhere() {
    let router = MessageRouter::new();
    let sink = DeadLetterSink::new();
    let delivered = router.route(
      &Message::complete("nobody", "i", DataBag::new()),
      &HashMap::new(),
      &sink,
    );
    assert_eq!(delivered, 0);
    assert!(sink.is_empty());
  }
}
