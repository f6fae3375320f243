//! Node instances and their status transitions.
//!
//! One instance exists per node per run, created lazily on the first
//! execution attempt (or when a cancel reaches a node that never ran). Every
//! transition goes through a single `DashMap` entry operation so status
//! changes are atomic per node.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::data::NodeExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl NodeStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, NodeStatus::Pending | NodeStatus::Running)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
  /// Unique per execution attempt.
  pub instance_id: String,
  pub node_id: String,
  pub run_id: String,
  pub status: NodeStatus,
  pub started_at: Option<DateTime<Utc>>,
  pub ended_at: Option<DateTime<Utc>>,
  pub error: Option<String>,
  pub fault: Option<String>,
  pub context: NodeExecutionContext,
  /// Number of execution attempts in this run.
  pub executions: u32,
}

impl NodeInstance {
  fn new(node_id: &str, run_id: &str) -> Self {
    Self {
      instance_id: uuid::Uuid::new_v4().to_string(),
      node_id: node_id.to_string(),
      run_id: run_id.to_string(),
      status: NodeStatus::Pending,
      started_at: None,
      ended_at: None,
      error: None,
      fault: None,
      context: NodeExecutionContext::default(),
      executions: 0,
    }
  }
}

/// Result of trying to start a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
  Started { instance_id: String },
  AlreadyRunning,
  Cancelled,
}

/// Result of applying a cancel to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
  /// The node moved to Cancelled.
  Cancelled { instance_id: String },
  /// The node had already been cancelled earlier.
  AlreadyCancelled,
  /// The node had already completed or failed; its status is kept.
  Kept(NodeStatus),
}

/// Result of recording an execution's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
  Applied,
  /// A cancel landed while the execution was in flight; status stays Cancelled.
  CancelledInFlight,
  /// The execution failed after a cancel landed. Failed replaces Cancelled.
  FailedAfterCancel,
}

/// Terminal data recorded when an execution returns.
#[derive(Debug)]
pub struct Finish {
  pub status: NodeStatus,
  pub error: Option<String>,
  pub fault: Option<String>,
  pub context: NodeExecutionContext,
  pub ended_at: DateTime<Utc>,
}

/// Concurrent per-run map of node instances, keyed by node id.
#[derive(Debug, Default)]
pub struct InstanceTable {
  instances: DashMap<String, NodeInstance>,
}

impl InstanceTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Pending -> Running transition for a new execution attempt.
  ///
  /// Refuses to re-enter a node that is already running, and never restarts a
  /// node that was cancelled in this run.
  pub fn begin(&self, node_id: &str, run_id: &str) -> BeginOutcome {
    let mut entry = self
      .instances
      .entry(node_id.to_string())
      .or_insert_with(|| NodeInstance::new(node_id, run_id));

    match entry.status {
      NodeStatus::Running => BeginOutcome::AlreadyRunning,
      NodeStatus::Cancelled => BeginOutcome::Cancelled,
      NodeStatus::Pending | NodeStatus::Completed | NodeStatus::Failed => {
        if entry.executions > 0 {
          entry.instance_id = uuid::Uuid::new_v4().to_string();
        }
        entry.status = NodeStatus::Running;
        entry.started_at = Some(Utc::now());
        entry.ended_at = None;
        entry.error = None;
        entry.fault = None;
        entry.executions += 1;
        BeginOutcome::Started {
          instance_id: entry.instance_id.clone(),
        }
      }
    }
  }

  /// Running -> terminal transition with the execution's outcome.
  ///
  /// A cancel that arrived mid-execution keeps the node Cancelled, unless the
  /// execution itself failed.
  pub fn finish(&self, node_id: &str, finish: Finish) -> FinishOutcome {
    let Some(mut entry) = self.instances.get_mut(node_id) else {
      return FinishOutcome::Applied;
    };

    entry.ended_at = Some(finish.ended_at);
    entry.context = finish.context;
    entry.fault = finish.fault;

    if entry.status == NodeStatus::Cancelled {
      if finish.status == NodeStatus::Failed {
        entry.status = NodeStatus::Failed;
        entry.error = finish.error;
        return FinishOutcome::FailedAfterCancel;
      }
      // keep the cancel reason as the error
      FinishOutcome::CancelledInFlight
    } else {
      entry.status = finish.status;
      entry.error = finish.error;
      FinishOutcome::Applied
    }
  }

  /// Mark a node Cancelled unless it already reached Completed or Failed.
  pub fn cancel(&self, node_id: &str, run_id: &str, reason: &str) -> CancelOutcome {
    let mut entry = self
      .instances
      .entry(node_id.to_string())
      .or_insert_with(|| NodeInstance::new(node_id, run_id));

    match entry.status {
      NodeStatus::Pending | NodeStatus::Running => {
        entry.status = NodeStatus::Cancelled;
        entry.ended_at = Some(Utc::now());
        entry.error = Some(reason.to_string());
        CancelOutcome::Cancelled {
          instance_id: entry.instance_id.clone(),
        }
      }
      NodeStatus::Cancelled => CancelOutcome::AlreadyCancelled,
      status @ (NodeStatus::Completed | NodeStatus::Failed) => CancelOutcome::Kept(status),
    }
  }

  pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
    self.instances.get(node_id).map(|i| i.status)
  }

  pub fn is_running(&self, node_id: &str) -> bool {
    self.status(node_id) == Some(NodeStatus::Running)
  }

  pub fn get(&self, node_id: &str) -> Option<NodeInstance> {
    self.instances.get(node_id).map(|i| i.value().clone())
  }

  pub fn all_terminal(&self) -> bool {
    self.instances.iter().all(|i| i.status.is_terminal())
  }

  /// Node ids still Pending or Running, sorted.
  pub fn non_terminal(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .instances
      .iter()
      .filter(|i| !i.status.is_terminal())
      .map(|i| i.node_id.clone())
      .collect();
    ids.sort();
    ids
  }

  /// Copy of every instance, sorted by node id.
  pub fn snapshot(&self) -> Vec<NodeInstance> {
    let mut all: Vec<NodeInstance> = self.instances.iter().map(|i| i.value().clone()).collect();
    all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    all
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn finish(status: NodeStatus) -> Finish {
    Finish {
      status,
      error: None,
      fault: None,
      context: NodeExecutionContext::default(),
      ended_at: Utc::now(),
    }
  }

  #[test]
  fn test_begin_then_finish() {
    let table = InstanceTable::new();
    let BeginOutcome::Started { instance_id } = table.begin("a", "run") else {
      panic!("expected start");
    };
    assert!(table.is_running("a"));
    assert!(!table.all_terminal());
    assert_eq!(table.non_terminal(), ["a".to_string()]);

    assert_eq!(table.finish("a", finish(NodeStatus::Completed)), FinishOutcome::Applied);
    let instance = table.get("a").unwrap();
    assert_eq!(instance.status, NodeStatus::Completed);
    assert_eq!(instance.instance_id, instance_id);
    assert_eq!(instance.executions, 1);
    assert!(table.all_terminal());
  }

  #[test]
  fn test_begin_refuses_reentry() {
    let table = InstanceTable::new();
    table.begin("a", "run");
    assert_eq!(table.begin("a", "run"), BeginOutcome::AlreadyRunning);
  }

  #[test]
  fn test_rerun_gets_new_instance_id() {
    let table = InstanceTable::new();
    let BeginOutcome::Started { instance_id: first } = table.begin("a", "run") else {
      panic!("expected start");
    };
    table.finish("a", finish(NodeStatus::Completed));
    let BeginOutcome::Started { instance_id: second } = table.begin("a", "run") else {
      panic!("expected start");
    };
    assert_ne!(first, second);
    assert_eq!(table.get("a").unwrap().executions, 2);
  }

  #[test]
  fn test_cancel_never_downgrades_failed() {
    let table = InstanceTable::new();
    table.begin("a", "run");
    table.finish("a", finish(NodeStatus::Failed));

    assert_eq!(
      table.cancel("a", "run", "cascade"),
      CancelOutcome::Kept(NodeStatus::Failed)
    );
    assert_eq!(table.status("a"), Some(NodeStatus::Failed));
  }

  #[test]
  fn test_cancel_creates_instance_for_unstarted_node() {
    let table = InstanceTable::new();
    assert!(matches!(
      table.cancel("e", "run", "upstream failed"),
      CancelOutcome::Cancelled { .. }
    ));
    assert_eq!(table.status("e"), Some(NodeStatus::Cancelled));
    assert_eq!(table.cancel("e", "run", "again"), CancelOutcome::AlreadyCancelled);
    assert_eq!(table.begin("e", "run"), BeginOutcome::Cancelled);
  }

  #[test]
  fn test_cancel_in_flight_wins_over_late_finish() {
    let table = InstanceTable::new();
    table.begin("a", "run");
    table.cancel("a", "run", "run cancelled");

    assert_eq!(
      table.finish("a", finish(NodeStatus::Completed)),
      FinishOutcome::CancelledInFlight
    );
    assert_eq!(table.status("a"), Some(NodeStatus::Cancelled));
  }

  #[test]
  fn test_failure_after_cancel_is_kept() {
    let table = InstanceTable::new();
    table.begin("a", "run");
    table.cancel("a", "run", "upstream failed");

    let mut failed = finish(NodeStatus::Failed);
    failed.error = Some("disk full".to_string());
    assert_eq!(table.finish("a", failed), FinishOutcome::FailedAfterCancel);

    let instance = table.get("a").unwrap();
    assert_eq!(instance.status, NodeStatus::Failed);
    assert_eq!(instance.error.as_deref(), Some("disk full"));
    assert_eq!(
      table.cancel("a", "run", "again"),
      CancelOutcome::Kept(NodeStatus::Failed)
    );
  }
}
