//! Engine errors.

use switchyard_workflow::WorkflowError;

use crate::queue::QueueError;

/// Errors surfaced by the engine's lifecycle operations.
///
/// Node-level failures are not errors: they end up as `Failed` node instances
/// and a `Failed` run status on an `Ok` [`RunResult`](crate::RunResult).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The workflow definition is structurally invalid.
  #[error("invalid workflow: {0}")]
  Validation(#[from] WorkflowError),

  /// A node names an executor that is not registered.
  #[error("node '{node_id}' uses unknown executor '{executor}'")]
  UnknownExecutor { node_id: String, executor: String },

  /// The whole-run timeout elapsed. The run is marked cancelled.
  #[error("run '{run_id}' timed out after {timeout_ms}ms")]
  Timeout { run_id: String, timeout_ms: u64 },

  /// Node instances were still pending or running after the completion ceiling.
  #[error("run '{run_id}' still has unfinished nodes after {ceiling_ms}ms: {}", .nodes.join(", "))]
  StuckRun {
    run_id: String,
    ceiling_ms: u64,
    nodes: Vec<String>,
  },

  /// The run was cancelled by its caller.
  #[error("run '{run_id}' was cancelled")]
  Cancelled { run_id: String },

  #[error("run '{run_id}' not found")]
  RunNotFound { run_id: String },

  /// The run has not reached a terminal status yet.
  #[error("run '{run_id}' is still running")]
  RunActive { run_id: String },

  #[error("{operation} is not supported")]
  NotSupported { operation: &'static str },

  /// Dispatch finished while a node was still in a non-terminal state.
  #[error("run '{run_id}' drained with non-terminal nodes: {}", .nodes.join(", "))]
  Inconsistent { run_id: String, nodes: Vec<String> },

  /// An entry node could not be triggered.
  #[error("failed to trigger entry node '{node_id}'")]
  Bootstrap {
    node_id: String,
    #[source]
    source: QueueError,
  },

  /// A detached run task panicked or was aborted.
  #[error("run '{run_id}' task failed: {message}")]
  Join { run_id: String, message: String },
}

impl EngineError {
  /// Id of the run the error belongs to, when the run was registered.
  pub fn run_id(&self) -> Option<&str> {
    match self {
      EngineError::Timeout { run_id, .. }
      | EngineError::StuckRun { run_id, .. }
      | EngineError::Cancelled { run_id }
      | EngineError::Inconsistent { run_id, .. }
      | EngineError::Join { run_id, .. } => Some(run_id),
      EngineError::Validation(_)
      | EngineError::UnknownExecutor { .. }
      | EngineError::RunNotFound { .. }
      | EngineError::RunActive { .. }
      | EngineError::NotSupported { .. }
      | EngineError::Bootstrap { .. } => None,
    }
  }
}
