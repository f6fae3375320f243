//! Workflow lifecycle: start, cancel, query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use switchyard_config::WorkflowDef;
use switchyard_workflow::Workflow;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::data::DataBag;
use crate::dispatch::{DispatchExit, Dispatcher};
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, Notifiers};
use crate::executor::{ExecutorRegistry, NodeExecutor};
use crate::message::Message;
use crate::run::{RunResult, RunState, RunStatus};

/// Per-run options for [`WorkflowEngine::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
  /// Whole-run timeout. Falls back to the definition's `timeout_ms`.
  pub timeout: Option<Duration>,
  /// Payload carried by the bootstrap message of every entry node.
  pub input: serde_json::Value,
  /// Caller cancellation. The run gets a child of this token.
  pub cancel: Option<CancellationToken>,
}

impl StartOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_input(mut self, input: serde_json::Value) -> Self {
    self.input = input;
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = Some(cancel);
    self
  }
}

/// A run driven on a background task.
#[derive(Debug)]
pub struct RunHandle {
  run_id: String,
  handle: JoinHandle<Result<RunResult, EngineError>>,
}

impl RunHandle {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// Wait for the run to finish.
  pub async fn wait(self) -> Result<RunResult, EngineError> {
    match self.handle.await {
      Ok(result) => result,
      Err(e) => Err(EngineError::Join {
        run_id: self.run_id,
        message: e.to_string(),
      }),
    }
  }
}

/// Drives workflow runs.
///
/// Runs stay registered after they finish so their status can still be
/// queried, until [`WorkflowEngine::forget`] drops them.
pub struct WorkflowEngine {
  config: EngineConfig,
  registry: ExecutorRegistry,
  notifiers: Notifiers,
  runs: DashMap<String, Arc<RunState>>,
}

impl WorkflowEngine {
  pub fn new(config: EngineConfig, registry: ExecutorRegistry) -> Self {
    Self {
      config,
      registry,
      notifiers: Notifiers::default(),
      runs: DashMap::new(),
    }
  }

  /// Register an observer for execution events.
  pub fn with_notifier(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifiers.push(Arc::new(notifier));
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn registry(&self) -> &ExecutorRegistry {
    &self.registry
  }

  /// Validate, start and drive a run to its end.
  ///
  /// A run whose nodes failed still returns `Ok`; inspect
  /// [`RunResult::status`]. Errors are reserved for invalid definitions,
  /// timeouts, cancellation, and a run that never settles.
  #[instrument(
    name = "workflow_start",
    skip(self, def, options),
    fields(workflow_id = %def.workflow_id)
  )]
  pub async fn start(
    &self,
    def: WorkflowDef,
    options: StartOptions,
  ) -> Result<RunResult, EngineError> {
    let (run, timeout) = self.prepare(def, options)?;
    drive(run, timeout).await
  }

  /// Validate and register a run synchronously, then drive it on a task.
  pub fn spawn(&self, def: WorkflowDef, options: StartOptions) -> Result<RunHandle, EngineError> {
    let (run, timeout) = self.prepare(def, options)?;
    let run_id = run.run_id.clone();
    let handle = tokio::spawn(drive(run, timeout));
    Ok(RunHandle { run_id, handle })
  }

  /// Request cancellation of a run.
  ///
  /// In-flight executions observe the run's token at their own checkpoints;
  /// no further node is started.
  pub fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
    let run = self.lookup(run_id)?;
    run.cancel.cancel();
    let status = run.finish(RunStatus::Cancelled);
    info!(run_id = %run_id, status = %status, "run_cancel_requested");
    Ok(())
  }

  /// Current view of a run, or `None` if the id is unknown.
  pub fn status(&self, run_id: &str) -> Option<RunResult> {
    self.runs.get(run_id).map(|run| run.result())
  }

  /// Ids of every registered run.
  pub fn runs(&self) -> Vec<String> {
    self.runs.iter().map(|r| r.key().clone()).collect()
  }

  /// Drop a finished run and return its final view.
  ///
  /// Runs stay registered until forgotten. A run that has not reached a
  /// terminal status is kept and `RunActive` is returned.
  pub fn forget(&self, run_id: &str) -> Result<RunResult, EngineError> {
    let removed = self
      .runs
      .remove_if(run_id, |_, run| run.status().is_terminal());

    match removed {
      Some((_, run)) => {
        debug!(run_id = %run_id, "run forgotten");
        Ok(run.result())
      }
      None if self.runs.contains_key(run_id) => Err(EngineError::RunActive {
        run_id: run_id.to_string(),
      }),
      None => Err(EngineError::RunNotFound {
        run_id: run_id.to_string(),
      }),
    }
  }

  /// Wait until every node instance of a run is terminal.
  ///
  /// Polls at `completion_poll_ms` and gives up after `completion_ceiling_ms`
  /// with the ids of the nodes that never settled.
  pub async fn wait_for_completion(&self, run_id: &str) -> Result<RunResult, EngineError> {
    let run = self.lookup(run_id)?;
    wait_settled(&run).await?;
    Ok(run.result())
  }

  pub async fn pause(&self, _run_id: &str) -> Result<(), EngineError> {
    Err(EngineError::NotSupported { operation: "pause" })
  }

  pub async fn resume(&self, _run_id: &str) -> Result<(), EngineError> {
    Err(EngineError::NotSupported { operation: "resume" })
  }

  pub async fn recover_incomplete(&self) -> Result<Vec<String>, EngineError> {
    Err(EngineError::NotSupported {
      operation: "recovering incomplete runs",
    })
  }

  fn lookup(&self, run_id: &str) -> Result<Arc<RunState>, EngineError> {
    self
      .runs
      .get(run_id)
      .map(|run| Arc::clone(run.value()))
      .ok_or_else(|| EngineError::RunNotFound {
        run_id: run_id.to_string(),
      })
  }

  /// Validate the definition, build the run context and trigger entry nodes.
  fn prepare(
    &self,
    def: WorkflowDef,
    options: StartOptions,
  ) -> Result<(Arc<RunState>, Option<Duration>), EngineError> {
    let workflow = Workflow::lock(def)?;

    let mut executors: HashMap<String, Arc<dyn NodeExecutor>> = HashMap::new();
    for node in workflow.nodes() {
      let executor = self
        .registry
        .get(&node.executor)
        .ok_or_else(|| EngineError::UnknownExecutor {
          node_id: node.node_id.clone(),
          executor: node.executor.clone(),
        })?;
      executors.insert(node.node_id.clone(), executor);
    }

    let timeout = options
      .timeout
      .or_else(|| workflow.timeout_ms.map(Duration::from_millis));
    let cancel = options
      .cancel
      .map(|parent| parent.child_token())
      .unwrap_or_default();

    let run_id = uuid::Uuid::new_v4().to_string();
    let run = Arc::new(RunState::new(
      run_id.clone(),
      Arc::new(workflow),
      executors,
      cancel,
      self.notifiers.clone(),
      self.config.clone(),
    ));

    let input = Arc::new(DataBag::from_json(options.input));
    for entry in run.workflow.graph().entry_points() {
      let Some(queue) = run.queue(entry) else {
        continue;
      };
      queue
        .enqueue(Message::start(&run_id, Arc::clone(&input)))
        .map_err(|source| EngineError::Bootstrap {
          node_id: entry.clone(),
          source,
        })?;
    }

    self.runs.insert(run_id.clone(), Arc::clone(&run));

    info!(
      run_id = %run_id,
      workflow_id = %run.workflow.workflow_id,
      entry_points = ?run.workflow.graph().entry_points(),
      timeout_ms = ?timeout.map(|t| t.as_millis() as u64),
      notifiers = self.notifiers.len(),
      "run_started"
    );
    run.emit(ExecutionEvent::RunStarted {
      run_id,
      workflow_id: run.workflow.workflow_id.clone(),
    });

    Ok((run, timeout))
  }
}

/// Run the dispatch loop under the optional timeout and settle the run.
#[instrument(name = "workflow_dispatch", skip_all, fields(run_id = %run.run_id))]
async fn drive(run: Arc<RunState>, timeout: Option<Duration>) -> Result<RunResult, EngineError> {
  let dispatch = Dispatcher::new(Arc::clone(&run)).run();

  let exit = match timeout {
    Some(limit) => match tokio::time::timeout(limit, dispatch).await {
      Ok(exit) => exit,
      Err(_) => {
        // in-flight executions are detached, not aborted
        run.cancel.cancel();
        let timeout_ms = limit.as_millis() as u64;
        warn!(run_id = %run.run_id, timeout_ms, "run_timed_out");
        settle(&run, RunStatus::Cancelled);
        return Err(EngineError::Timeout {
          run_id: run.run_id.clone(),
          timeout_ms,
        });
      }
    },
    None => dispatch.await,
  };

  if exit == DispatchExit::Cancelled {
    settle(&run, RunStatus::Cancelled);
    return Err(EngineError::Cancelled {
      run_id: run.run_id.clone(),
    });
  }

  wait_settled(&run).await?;

  let status = run.derive_status();
  if status == RunStatus::Running {
    return Err(EngineError::Inconsistent {
      run_id: run.run_id.clone(),
      nodes: run.instances.non_terminal(),
    });
  }

  settle(&run, status);
  Ok(run.result())
}

fn settle(run: &RunState, status: RunStatus) {
  let status = run.finish(status);
  info!(
    run_id = %run.run_id,
    status = %status,
    dead_letters = run.dead_letters.len(),
    "run_finished"
  );
  run.emit(ExecutionEvent::RunFinished {
    run_id: run.run_id.clone(),
    status,
  });
}

async fn wait_settled(run: &RunState) -> Result<(), EngineError> {
  let poll = run.config.completion_poll();
  let ceiling = run.config.completion_ceiling();

  let settled = tokio::time::timeout(ceiling, async {
    while !run.instances.all_terminal() {
      tokio::time::sleep(poll).await;
    }
  })
  .await;

  settled.map_err(|_| EngineError::StuckRun {
    run_id: run.run_id.clone(),
    ceiling_ms: ceiling.as_millis() as u64,
    nodes: run.instances.non_terminal(),
  })
}
