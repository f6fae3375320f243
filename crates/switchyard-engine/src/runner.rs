//! Workflow runner with channel-based triggering.
//!
//! The `WorkflowRunner` owns an mpsc channel for receiving trigger payloads
//! and starts one run of its workflow per payload on a shared `WorkflowEngine`.

use std::sync::Arc;

use switchyard_config::WorkflowDef;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::{StartOptions, WorkflowEngine};
use crate::error::EngineError;
use crate::run::RunResult;

/// Raised when a payload cannot be handed to the runner.
#[derive(Debug, thiserror::Error)]
#[error("workflow runner channel closed")]
pub struct RunnerClosed;

/// A runner that executes a workflow in response to trigger payloads.
///
/// # Usage
///
/// ```ignore
/// let runner = WorkflowRunner::new(engine, definition);
///
/// // Get sender for external triggers (webhooks, timers, etc.)
/// let sender = runner.sender();
///
/// // Start the execution loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await;
/// ```
pub struct WorkflowRunner {
  sender: mpsc::Sender<serde_json::Value>,
  receiver: mpsc::Receiver<serde_json::Value>,
  engine: Arc<WorkflowEngine>,
  workflow: WorkflowDef,
}

impl WorkflowRunner {
  pub fn new(engine: Arc<WorkflowEngine>, workflow: WorkflowDef) -> Self {
    Self::with_buffer_size(engine, workflow, 100)
  }

  /// Create a new workflow runner with a custom buffer size.
  pub fn with_buffer_size(
    engine: Arc<WorkflowEngine>,
    workflow: WorkflowDef,
    buffer_size: usize,
  ) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
      workflow,
    }
  }

  /// Get a sender handle for triggering workflow runs.
  pub fn sender(&self) -> mpsc::Sender<serde_json::Value> {
    self.sender.clone()
  }

  /// Queue a run with the given payload.
  pub async fn run(&self, payload: serde_json::Value) -> Result<(), RunnerClosed> {
    self.sender.send(payload).await.map_err(|_| RunnerClosed)
  }

  /// Start the execution loop.
  ///
  /// Runs until the cancellation token fires or every sender is dropped. Each
  /// payload starts one run with a child of `cancel`; runs are sequential.
  /// Finished runs are forgotten by the engine once they have been logged.
  pub async fn start(mut self, cancel: CancellationToken) {
    // our own sender would keep the channel open forever
    drop(self.sender);

    info!(
      workflow_id = %self.workflow.workflow_id,
      workflow_name = %self.workflow.name,
      "starting workflow runner"
    );

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(workflow_id = %self.workflow.workflow_id, "workflow runner cancelled");
          break;
        }
        payload = self.receiver.recv() => {
          let Some(payload) = payload else {
            info!(workflow_id = %self.workflow.workflow_id, "workflow runner channel closed");
            break;
          };

          let options = StartOptions::new()
            .with_input(payload)
            .with_cancel(cancel.child_token());
          let outcome = self.engine.start(self.workflow.clone(), options).await;
          let run_id = match &outcome {
            Ok(result) => Some(result.run_id.clone()),
            Err(e) => e.run_id().map(str::to_string),
          };

          match outcome {
            Ok(result) => {
              info!(
                workflow_id = %self.workflow.workflow_id,
                run_id = %result.run_id,
                status = %result.status,
                nodes_executed = result.nodes.len(),
                "workflow run finished"
              );
            }
            Err(EngineError::Cancelled { run_id }) => {
              info!(
                workflow_id = %self.workflow.workflow_id,
                run_id = %run_id,
                "workflow run cancelled"
              );
            }
            Err(e) => {
              error!(
                workflow_id = %self.workflow.workflow_id,
                error = %e,
                "workflow run failed to complete"
              );
            }
          }

          // the result has been reported; the engine must not keep every run
          if let Some(run_id) = run_id {
            if let Err(e) = self.engine.forget(&run_id) {
              warn!(run_id = %run_id, error = %e, "run not released");
            }
          }
        }
      }
    }
  }

  /// Execute a single run directly, bypassing the channel.
  pub async fn execute_once(
    &self,
    payload: serde_json::Value,
    cancel: CancellationToken,
  ) -> Result<RunResult, EngineError> {
    let options = StartOptions::new().with_input(payload).with_cancel(cancel);
    self.engine.start(self.workflow.clone(), options).await
  }

  pub fn engine(&self) -> &WorkflowEngine {
    &self.engine
  }

  pub fn workflow(&self) -> &WorkflowDef {
    &self.workflow
  }
}
