//! Upstream arrival tracking for nodes that join on all inputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use switchyard_config::JoinStrategy;
use switchyard_workflow::Workflow;

use crate::data::DataBag;

/// Outcome of recording one upstream arrival.
#[derive(Debug)]
pub enum JoinDecision {
  /// Not every upstream node has signalled yet.
  Wait { arrived: usize, expected: usize },
  /// The round is complete. Carries each upstream's data, ordered by node id.
  Ready(Vec<(String, Arc<DataBag>)>),
}

#[derive(Debug)]
struct JoinRound {
  expected: usize,
  arrived: Mutex<BTreeMap<String, Arc<DataBag>>>,
}

/// Per-run tracker for every node with [`JoinStrategy::All`].
#[derive(Debug, Default)]
pub struct JoinTracker {
  rounds: HashMap<String, JoinRound>,
}

impl JoinTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register every "all" node of the workflow with its distinct upstream count.
  pub fn from_workflow(workflow: &Workflow) -> Self {
    let mut tracker = Self::new();
    for node in workflow.nodes() {
      if node.join == JoinStrategy::All {
        let expected = workflow.graph().upstream(&node.node_id).len();
        tracker.register(&node.node_id, expected);
      }
    }
    tracker
  }

  pub fn register(&mut self, node_id: &str, expected: usize) {
    self.rounds.insert(
      node_id.to_string(),
      JoinRound {
        expected,
        arrived: Mutex::new(BTreeMap::new()),
      },
    );
  }

  pub fn is_tracked(&self, node_id: &str) -> bool {
    self.rounds.contains_key(node_id)
  }

  pub fn expected(&self, node_id: &str) -> Option<usize> {
    self.rounds.get(node_id).map(|r| r.expected)
  }

  /// Record that `source` signalled `target`.
  ///
  /// Repeated arrivals from the same source within a round count once (the
  /// latest data wins). The set is cleared in the same critical section that
  /// decides the round is complete. A node registered with zero expected
  /// upstreams never becomes ready here.
  pub fn arrive(&self, target: &str, source: &str, data: Arc<DataBag>) -> JoinDecision {
    let Some(round) = self.rounds.get(target) else {
      return JoinDecision::Ready(vec![(source.to_string(), data)]);
    };

    let mut arrived = round.arrived.lock();
    arrived.insert(source.to_string(), data);

    if round.expected > 0 && arrived.len() >= round.expected {
      let inputs = std::mem::take(&mut *arrived);
      JoinDecision::Ready(inputs.into_iter().collect())
    } else {
      JoinDecision::Wait {
        arrived: arrived.len(),
        expected: round.expected,
      }
    }
  }

  /// Upstream nodes seen in the current round of `target`.
  pub fn pending(&self, target: &str) -> Vec<String> {
    self
      .rounds
      .get(target)
      .map(|r| r.arrived.lock().keys().cloned().collect())
      .unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use serde_json::json;

  use super::*;

  fn bag(v: serde_json::Value) -> Arc<DataBag> {
    Arc::new(DataBag::from_json(v))
  }

  #[test]
  fn test_ready_after_all_distinct_upstreams() {
    let mut tracker = JoinTracker::new();
    tracker.register("e", 3);

    assert!(matches!(
      tracker.arrive("e", "c", bag(json!({}))),
      JoinDecision::Wait {
        arrived: 1,
        expected: 3
      }
    ));
    assert!(matches!(
      tracker.arrive("e", "b", bag(json!({}))),
      JoinDecision::Wait { arrived: 2, .. }
    ));
    match tracker.arrive("e", "d", bag(json!({}))) {
      JoinDecision::Ready(inputs) => {
        let sources: Vec<_> = inputs.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(sources, ["b", "c", "d"]);
      }
      other => panic!("expected ready, got {other:?}"),
    }
    assert!(tracker.pending("e").is_empty());
  }

  #[test]
  fn test_duplicate_arrival_not_double_counted() {
    let mut tracker = JoinTracker::new();
    tracker.register("e", 2);

    tracker.arrive("e", "b", bag(json!({"v": 1})));
    assert!(matches!(
      tracker.arrive("e", "b", bag(json!({"v": 2}))),
      JoinDecision::Wait { arrived: 1, .. }
    ));

    match tracker.arrive("e", "c", bag(json!({}))) {
      JoinDecision::Ready(inputs) => {
        assert_eq!(inputs[0].0, "b");
        assert_eq!(inputs[0].1.get("v"), Some(&json!(2)));
      }
      other => panic!("expected ready, got {other:?}"),
    }
  }

  #[test]
  fn test_round_resets_for_next_iteration() {
    let mut tracker = JoinTracker::new();
    tracker.register("e", 2);

    tracker.arrive("e", "b", bag(json!({})));
    assert!(matches!(
      tracker.arrive("e", "c", bag(json!({}))),
      JoinDecision::Ready(_)
    ));

    // second round starts from zero
    assert!(matches!(
      tracker.arrive("e", "c", bag(json!({}))),
      JoinDecision::Wait { arrived: 1, .. }
    ));
    assert_eq!(tracker.pending("e"), ["c".to_string()]);
  }

  #[test]
  fn test_from_workflow_tracks_all_nodes() {
    use switchyard_config::{ConnectionDef, MessageKind, NodeDef, WorkflowDef};

    let workflow = Workflow::lock(
      WorkflowDef::new("diamond", "Diamond")
        .node(NodeDef::new("a", "noop"))
        .node(NodeDef::new("b", "noop"))
        .node(NodeDef::new("c", "noop"))
        .node(NodeDef::new("e", "noop").with_join(JoinStrategy::All))
        .connect(ConnectionDef::new("a", "b"))
        .connect(ConnectionDef::new("a", "c"))
        .connect(ConnectionDef::new("b", "e"))
        .connect(ConnectionDef::new("c", "e"))
        .connect(ConnectionDef::new("c", "e").on(MessageKind::Fail))
        .connect(ConnectionDef::new("a", "e").disabled()),
    )
    .unwrap();

    let tracker = JoinTracker::from_workflow(&workflow);
    assert!(tracker.is_tracked("e"));
    assert!(!tracker.is_tracked("b"));
    // distinct enabled upstreams only
    assert_eq!(tracker.expected("e"), Some(2));
    assert_eq!(tracker.expected("b"), None);
  }

  #[test]
  fn test_zero_expected_never_ready() {
    let mut tracker = JoinTracker::new();
    tracker.register("orphan", 0);
    assert!(matches!(
      tracker.arrive("orphan", "x", bag(json!({}))),
      JoinDecision::Wait { expected: 0, .. }
    ));
  }

  #[test]
  fn test_concurrent_arrivals_trigger_once_per_round() {
    const UPSTREAMS: usize = 4;
    const ROUNDS: usize = 250;

    let mut tracker = JoinTracker::new();
    tracker.register("e", UPSTREAMS);
    let tracker = Arc::new(tracker);
    let ready = AtomicUsize::new(0);

    // each upstream signals once per round; rounds are separated by a barrier
    let barrier = std::sync::Barrier::new(UPSTREAMS);
    std::thread::scope(|scope| {
      for u in 0..UPSTREAMS {
        let tracker = &tracker;
        let ready = &ready;
        let barrier = &barrier;
        scope.spawn(move || {
          for _ in 0..ROUNDS {
            if let JoinDecision::Ready(inputs) =
              tracker.arrive("e", &format!("u{u}"), Arc::new(DataBag::new()))
            {
              assert_eq!(inputs.len(), UPSTREAMS);
              ready.fetch_add(1, Ordering::SeqCst);
            }
            barrier.wait();
          }
        });
      }
    });

    assert_eq!(ready.load(Ordering::SeqCst), ROUNDS);
  }
}
