//! Per-run execution context and the result reported to callers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use switchyard_workflow::Workflow;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::events::{ExecutionEvent, Notifiers};
use crate::executor::NodeExecutor;
use crate::instance::{InstanceTable, NodeInstance, NodeStatus};
use crate::join::JoinTracker;
use crate::queue::NodeQueue;
use crate::router::MessageRouter;

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    self != RunStatus::Running
  }
}

impl std::fmt::Display for RunStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      RunStatus::Running => "running",
      RunStatus::Completed => "completed",
      RunStatus::Failed => "failed",
      RunStatus::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
  pub run_id: String,
  pub workflow_id: String,
  pub status: RunStatus,
  pub started_at: DateTime<Utc>,
  pub ended_at: Option<DateTime<Utc>>,
  /// Node instances, sorted by node id.
  pub nodes: Vec<NodeInstance>,
  /// Workflow-level variables, including aggregated error text on failure.
  pub variables: BTreeMap<String, serde_json::Value>,
  pub dead_letters: Vec<DeadLetter>,
}

impl RunResult {
  pub fn node(&self, node_id: &str) -> Option<&NodeInstance> {
    self.nodes.iter().find(|n| n.node_id == node_id)
  }

  pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
    self.node(node_id).map(|n| n.status)
  }

  /// Consolidated error text of every failed node, if the run failed.
  pub fn errors(&self) -> Option<&str> {
    self.variables.get("errors").and_then(|v| v.as_str())
  }
}

/// Everything the engine owns for the lifetime of one run.
pub(crate) struct RunState {
  pub(crate) run_id: String,
  pub(crate) workflow: Arc<Workflow>,
  pub(crate) queues: HashMap<String, Arc<NodeQueue>>,
  pub(crate) router: MessageRouter,
  pub(crate) joins: JoinTracker,
  pub(crate) dead_letters: DeadLetterSink,
  pub(crate) instances: InstanceTable,
  pub(crate) variables: Arc<DashMap<String, serde_json::Value>>,
  pub(crate) executors: HashMap<String, Arc<dyn NodeExecutor>>,
  pub(crate) cancel: CancellationToken,
  pub(crate) notifiers: Notifiers,
  pub(crate) config: EngineConfig,
  started_at: DateTime<Utc>,
  status: Mutex<(RunStatus, Option<DateTime<Utc>>)>,
}

impl RunState {
  pub(crate) fn new(
    run_id: String,
    workflow: Arc<Workflow>,
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
    cancel: CancellationToken,
    notifiers: Notifiers,
    config: EngineConfig,
  ) -> Self {
    let queues = workflow
      .nodes()
      .iter()
      .map(|node| {
        (
          node.node_id.clone(),
          Arc::new(NodeQueue::with_capacity(
            node.node_id.clone(),
            config.queue_capacity,
          )),
        )
      })
      .collect();

    Self {
      router: MessageRouter::from_workflow(&workflow),
      joins: JoinTracker::from_workflow(&workflow),
      run_id,
      workflow,
      queues,
      dead_letters: DeadLetterSink::new(),
      instances: InstanceTable::new(),
      variables: Arc::new(DashMap::new()),
      executors,
      cancel,
      notifiers,
      config,
      started_at: Utc::now(),
      status: Mutex::new((RunStatus::Running, None)),
    }
  }

  pub(crate) fn queue(&self, node_id: &str) -> Option<&Arc<NodeQueue>> {
    self.queues.get(node_id)
  }

  pub(crate) fn queues_empty(&self) -> bool {
    self.queues.values().all(|q| q.is_empty())
  }

  pub(crate) fn status(&self) -> RunStatus {
    self.status.lock().0
  }

  /// Move the run to a terminal status. The first terminal status wins.
  pub(crate) fn finish(&self, status: RunStatus) -> RunStatus {
    let mut guard = self.status.lock();
    if !guard.0.is_terminal() {
      *guard = (status, Some(Utc::now()));
    }
    guard.0
  }

  pub(crate) fn emit(&self, event: ExecutionEvent) {
    self.notifiers.emit(event);
  }

  /// Final status from node instance statuses.
  ///
  /// Failed if any node failed, Completed if every node completed or was
  /// cancelled, Running otherwise. On failure the error text of every failed
  /// node is written to the run variables.
  pub(crate) fn derive_status(&self) -> RunStatus {
    let instances = self.instances.snapshot();

    let failed: Vec<&NodeInstance> = instances
      .iter()
      .filter(|i| i.status == NodeStatus::Failed)
      .collect();

    if !failed.is_empty() {
      let mut lines = Vec::with_capacity(failed.len());
      for instance in failed {
        let error = instance.error.as_deref().unwrap_or("unknown error");
        lines.push(format!("{}: {}", instance.node_id, error));
        self.variables.insert(
          format!("errors.{}", instance.node_id),
          serde_json::Value::String(error.to_string()),
        );
      }
      self
        .variables
        .insert("errors".to_string(), serde_json::Value::String(lines.join("\n")));
      return RunStatus::Failed;
    }

    let settled = instances
      .iter()
      .all(|i| matches!(i.status, NodeStatus::Completed | NodeStatus::Cancelled));
    if settled {
      RunStatus::Completed
    } else {
      RunStatus::Running
    }
  }

  pub(crate) fn result(&self) -> RunResult {
    let (status, ended_at) = *self.status.lock();
    RunResult {
      run_id: self.run_id.clone(),
      workflow_id: self.workflow.workflow_id.clone(),
      status,
      started_at: self.started_at,
      ended_at,
      nodes: self.instances.snapshot(),
      variables: self
        .variables
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect(),
      dead_letters: self.dead_letters.snapshot(),
    }
  }
}

#[cfg(test)]
mod tests {
  use switchyard_config::{NodeDef, WorkflowDef};

  use super::*;
  use crate::data::NodeExecutionContext;
  use crate::instance::Finish;

  fn create_run() -> RunState {
    let workflow = Workflow::lock(
      WorkflowDef::new("wf", "Pair")
        .node(NodeDef::new("a", "noop"))
        .node(NodeDef::new("b", "noop")),
    )
    .unwrap();
    RunState::new(
      "run-1".to_string(),
      Arc::new(workflow),
      HashMap::new(),
      CancellationToken::new(),
      Notifiers::default(),
      EngineConfig::default(),
    )
  }

  fn finish(status: NodeStatus, error: Option<&str>) -> Finish {
    Finish {
      status,
      error: error.map(str::to_string),
      fault: None,
      context: NodeExecutionContext::default(),
      ended_at: Utc::now(),
    }
  }

  #[test]
  fn test_running_node_leaves_status_running() {
    let run = create_run();
    run.instances.begin("a", "run-1");
    assert_eq!(run.derive_status(), RunStatus::Running);
    assert!(run.variables.get("errors").is_none());
  }

  #[test]
  fn test_failed_nodes_aggregate_errors() {
    let run = create_run();
    run.instances.begin("a", "run-1");
    run.instances.begin("b", "run-1");
    run.instances.finish("a", finish(NodeStatus::Failed, Some("timeout")));
    run.instances.finish("b", finish(NodeStatus::Failed, None));

    assert_eq!(run.derive_status(), RunStatus::Failed);
    let result = run.result();
    assert_eq!(result.errors(), Some("a: timeout\nb: unknown error"));
    assert_eq!(result.variables.get("errors.a"), Some(&serde_json::json!("timeout")));
  }

  #[test]
  fn test_first_terminal_status_wins() {
    let run = create_run();
    assert_eq!(run.status(), RunStatus::Running);
    assert_eq!(run.finish(RunStatus::Cancelled), RunStatus::Cancelled);
    assert_eq!(run.finish(RunStatus::Completed), RunStatus::Cancelled);
    assert!(run.result().ended_at.is_some());
  }
}
