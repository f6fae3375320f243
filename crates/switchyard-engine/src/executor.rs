//! The unit-of-work contract the engine drives, and the registry that maps a
//! node's `executor` discriminator to an implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use switchyard_workflow::Node;
use tokio_util::sync::CancellationToken;

use crate::data::NodeExecutionContext;

/// Shared run state visible to an executing node.
#[derive(Debug, Clone)]
pub struct RunScope {
  pub run_id: String,
  pub workflow_id: String,
  pub instance_id: String,
  pub node: Node,
  /// Fires when the run is cancelled or times out. Checking it is up to the executor.
  pub cancel: CancellationToken,
  /// Workflow-level variables shared by every node of the run.
  pub variables: Arc<DashMap<String, serde_json::Value>>,
}

/// Terminal status an executor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
  Completed,
  Failed,
}

/// Result reported by a node executor that ran to the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
  pub status: OutcomeStatus,
  pub ended_at: DateTime<Utc>,
  pub error: Option<String>,
  pub fault: Option<String>,
}

impl NodeOutcome {
  pub fn completed() -> Self {
    Self {
      status: OutcomeStatus::Completed,
      ended_at: Utc::now(),
      error: None,
      fault: None,
    }
  }

  pub fn failed(error: impl Into<String>) -> Self {
    Self {
      status: OutcomeStatus::Failed,
      ended_at: Utc::now(),
      error: Some(error.into()),
      fault: None,
    }
  }

  pub fn with_fault(mut self, fault: impl Into<String>) -> Self {
    self.fault = Some(fault.into());
    self
  }
}

/// An executor that could not finish its work.
///
/// Unlike a `Failed` outcome this is the unexpected path: the leased message
/// is abandoned rather than acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  #[error("invalid configuration for node '{node_id}': {message}")]
  InvalidConfig { node_id: String, message: String },

  #[error("node execution cancelled")]
  Cancelled,

  #[error("{0}")]
  Execution(String),
}

/// A unit of work bound to a node of the workflow.
///
/// Implementations must be safe to call from any worker and must not return
/// before their work is genuinely finished.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
  async fn execute(
    &self,
    scope: &RunScope,
    ctx: &mut NodeExecutionContext,
  ) -> Result<NodeOutcome, NodeError>;
}

/// Maps executor names to implementations.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
  executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry preloaded with the built-in executors.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    crate::builtin::register(&mut registry);
    registry
  }

  /// Register an executor under `name`, replacing any previous one.
  pub fn register(&mut self, name: impl Into<String>, executor: impl NodeExecutor + 'static) {
    self.register_arc(name, Arc::new(executor));
  }

  /// Register an executor that is shared with other registries.
  pub fn register_arc(&mut self, name: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
    self.executors.insert(name.into(), executor);
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn NodeExecutor>> {
    self.executors.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.executors.contains_key(name)
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }
}

impl fmt::Debug for ExecutorRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutorRegistry")
      .field("executors", &self.names())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builtin::Noop;

  #[test]
  fn test_builtins_registered() {
    let registry = ExecutorRegistry::with_builtins();
    assert_eq!(registry.names(), ["delay", "error", "fail", "noop", "set"]);
    assert!(registry.get("noop").is_some());
    assert!(!registry.contains("teleport"));
  }

  #[test]
  fn test_shared_executor_across_registries() {
    let shared: Arc<dyn NodeExecutor> = Arc::new(Noop);
    let mut first = ExecutorRegistry::new();
    let mut second = ExecutorRegistry::new();
    first.register_arc("pass", Arc::clone(&shared));
    second.register_arc("relay", Arc::clone(&shared));

    let a = first.get("pass").unwrap();
    let b = second.get("relay").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[test]
  fn test_failed_outcome_with_fault() {
    let outcome = NodeOutcome::failed("upstream refused").with_fault("status 503");
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("upstream refused"));
    assert_eq!(outcome.fault.as_deref(), Some("status 503"));
  }
}
