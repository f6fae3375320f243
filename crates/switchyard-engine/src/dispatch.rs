//! The coordinating dispatch loop.
//!
//! A single loop sweeps every node queue, decides whether the head message
//! starts an execution, and spawns node executions as independent tasks. It
//! never waits on a node; it only decides when one starts.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use switchyard_config::{JoinStrategy, MessageKind};
use switchyard_workflow::Node;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::data::{DataBag, NodeExecutionContext};
use crate::events::ExecutionEvent;
use crate::executor::{NodeError, NodeExecutor, OutcomeStatus, RunScope};
use crate::instance::{BeginOutcome, CancelOutcome, Finish, FinishOutcome, NodeStatus};
use crate::join::JoinDecision;
use crate::message::Message;
use crate::queue::Lease;
use crate::run::RunState;

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchExit {
  /// Every queue is empty, no execution is in flight, every instance is terminal.
  Drained,
  /// The run's cancellation token fired.
  Cancelled,
}

pub(crate) struct Dispatcher {
  run: Arc<RunState>,
  tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
  pub(crate) fn new(run: Arc<RunState>) -> Self {
    Self {
      run,
      tasks: Vec::new(),
    }
  }

  /// Sweep until the run drains or is cancelled.
  ///
  /// Dropping the returned future detaches in-flight node executions rather
  /// than aborting them.
  pub(crate) async fn run(mut self) -> DispatchExit {
    loop {
      if self.run.cancel.is_cancelled() {
        return DispatchExit::Cancelled;
      }

      self.tasks.retain(|t| !t.is_finished());

      if self.sweep() {
        continue;
      }

      if self.tasks.is_empty() && self.run.queues_empty() && self.run.instances.all_terminal() {
        return DispatchExit::Drained;
      }

      tokio::select! {
        _ = tokio::time::sleep(self.run.config.idle_sweep()) => {}
        _ = self.run.cancel.cancelled() => return DispatchExit::Cancelled,
      }
    }
  }

  /// One pass over every queue. Returns whether any message was taken.
  fn sweep(&mut self) -> bool {
    let run = Arc::clone(&self.run);
    let mut dispatched = false;

    for node in run.workflow.nodes() {
      let Some(queue) = run.queue(&node.node_id) else {
        continue;
      };

      match queue.peek_kind() {
        None => continue,
        Some(MessageKind::Cancel) => {}
        // one execution at a time per node; the message waits for the next sweep
        Some(_) if run.instances.is_running(&node.node_id) => continue,
        Some(_) => {}
      }

      // another consumer may have drained it since the peek
      let Some(lease) = queue.try_lease() else {
        continue;
      };

      dispatched = true;
      self.handle_message(node, lease);
    }

    dispatched
  }

  fn handle_message(&mut self, node: &Node, lease: Lease) {
    if let Message::Cancel {
      reason,
      cascade_from_failure,
      ..
    } = lease.message()
    {
      let reason = reason.clone();
      let cascade_from_failure = *cascade_from_failure;
      self.acknowledge(node, &lease);
      self.handle_cancel(node, &reason, cascade_from_failure);
      return;
    }

    if self.run.instances.status(&node.node_id) == Some(NodeStatus::Cancelled) {
      debug!(
        run_id = %self.run.run_id,
        node_id = %node.node_id,
        source_node = %lease.message().source_node_id(),
        "message discarded for cancelled node"
      );
      self.acknowledge(node, &lease);
      return;
    }

    let message = lease.message();
    let input = if message.is_start() || node.join == JoinStrategy::Any {
      message.to_input()
    } else {
      let data = match message {
        Message::Complete { data, .. } => Arc::clone(data),
        other => Arc::new(other.to_input()),
      };
      match self
        .run
        .joins
        .arrive(&node.node_id, message.source_node_id(), data)
      {
        JoinDecision::Wait { arrived, expected } => {
          debug!(
            run_id = %self.run.run_id,
            node_id = %node.node_id,
            source_node = %message.source_node_id(),
            arrived,
            expected,
            "join_waiting"
          );
          self.acknowledge(node, &lease);
          return;
        }
        JoinDecision::Ready(inputs) => {
          let mut merged = DataBag::new();
          for (_, bag) in &inputs {
            merged.extend_from(bag);
          }
          merged
        }
      }
    };

    self.execute_node(node, lease, input);
  }

  /// Mark the receiving node cancelled and pass the cancel on.
  ///
  /// A node that already completed or failed keeps its status but still
  /// forwards, so the whole subgraph behind a failure quiesces. A node that was
  /// already cancelled does not forward again.
  fn handle_cancel(&self, node: &Node, reason: &str, cascade_from_failure: bool) {
    let run = &self.run;
    let instance_id = match run.instances.cancel(&node.node_id, &run.run_id, reason) {
      CancelOutcome::Cancelled { instance_id } => {
        info!(
          run_id = %run.run_id,
          node_id = %node.node_id,
          instance_id = %instance_id,
          reason = %reason,
          "node_cancelled"
        );
        run.emit(ExecutionEvent::NodeCancelled {
          run_id: run.run_id.clone(),
          node_id: node.node_id.clone(),
          instance_id: instance_id.clone(),
          reason: reason.to_string(),
        });
        Some(instance_id)
      }
      CancelOutcome::AlreadyCancelled => return,
      CancelOutcome::Kept(status) => {
        debug!(
          run_id = %run.run_id,
          node_id = %node.node_id,
          status = ?status,
          "cancel passed through terminal node"
        );
        run.instances.get(&node.node_id).map(|i| i.instance_id)
      }
    };

    let forward = Message::cancel(&node.node_id, instance_id, reason, cascade_from_failure);
    run.router.route(&forward, &run.queues, &run.dead_letters);
  }

  fn execute_node(&mut self, node: &Node, lease: Lease, input: DataBag) {
    match self.run.instances.begin(&node.node_id, &self.run.run_id) {
      BeginOutcome::Started { instance_id } => {
        let run = Arc::clone(&self.run);
        let node = node.clone();
        self.tasks.push(tokio::spawn(async move {
          run_node(run, node, instance_id, lease, input).await;
        }));
      }
      BeginOutcome::AlreadyRunning => {
        warn!(
          run_id = %self.run.run_id,
          node_id = %node.node_id,
          "node already running; dropping trigger"
        );
        if let Some(queue) = self.run.queue(&node.node_id) {
          if let Err(e) = queue.abandon(&lease) {
            error!(error = %e, "failed to abandon lease");
          }
        }
      }
      BeginOutcome::Cancelled => {
        debug!(
          run_id = %self.run.run_id,
          node_id = %node.node_id,
          "node cancelled; trigger discarded"
        );
        self.acknowledge(node, &lease);
      }
    }
  }

  fn acknowledge(&self, node: &Node, lease: &Lease) {
    if let Some(queue) = self.run.queue(&node.node_id) {
      if let Err(e) = queue.complete(lease) {
        error!(run_id = %self.run.run_id, error = %e, "failed to complete lease");
      }
    }
  }
}

/// How a node execution ended.
enum Settled {
  Completed,
  Failed { error: String, faulted: bool },
  Cancelled { reason: String },
}

/// Execute one node and route its terminal message.
async fn run_node(run: Arc<RunState>, node: Node, instance_id: String, lease: Lease, input: DataBag) {
  info!(
    run_id = %run.run_id,
    node_id = %node.node_id,
    instance_id = %instance_id,
    executor = %node.executor,
    "node_started"
  );
  run.emit(ExecutionEvent::NodeStarted {
    run_id: run.run_id.clone(),
    node_id: node.node_id.clone(),
    instance_id: instance_id.clone(),
  });

  let scope = RunScope {
    run_id: run.run_id.clone(),
    workflow_id: run.workflow.workflow_id.clone(),
    instance_id: instance_id.clone(),
    node: node.clone(),
    cancel: run.cancel.clone(),
    variables: Arc::clone(&run.variables),
  };
  let mut ctx = NodeExecutionContext::new(input);
  let started = Instant::now();

  let (settled, fault, ended_at) = match run.executors.get(&node.node_id).cloned() {
    Some(executor) => invoke(executor.as_ref(), &scope, &mut ctx).await,
    // executors are resolved for every node before the run starts
    None => {
      let error = format!("no executor bound to node '{}'", node.node_id);
      (
        Settled::Failed {
          error: error.clone(),
          faulted: true,
        },
        Some(error),
        Utc::now(),
      )
    }
  };

  if let Some(queue) = run.queue(&node.node_id) {
    // the unexpected path gives the message up; everything else acknowledges it
    let acked = match &settled {
      Settled::Failed { faulted: true, .. } | Settled::Cancelled { .. } => queue.abandon(&lease),
      _ => queue.complete(&lease),
    };
    if let Err(e) = acked {
      error!(run_id = %run.run_id, node_id = %node.node_id, error = %e, "failed to release lease");
    }
  }

  let output = ctx.output.clone();
  let message_fault = fault.clone();
  let (status, error) = match &settled {
    Settled::Completed => (NodeStatus::Completed, None),
    Settled::Failed { error, .. } => (NodeStatus::Failed, Some(error.clone())),
    Settled::Cancelled { reason } => (NodeStatus::Cancelled, Some(reason.clone())),
  };
  let finished = run.instances.finish(
    &node.node_id,
    Finish {
      status,
      error,
      fault,
      context: ctx,
      ended_at,
    },
  );

  if finished == FinishOutcome::CancelledInFlight {
    info!(
      run_id = %run.run_id,
      node_id = %node.node_id,
      instance_id = %instance_id,
      "node finished after being cancelled; outcome not routed"
    );
    return;
  }

  // a cancelled run stops producing new work, and a node cancelled in flight
  // has already forwarded its cancel
  let route = finished == FinishOutcome::Applied && !run.cancel.is_cancelled();

  match settled {
    Settled::Completed => {
      let duration_ms = started.elapsed().as_millis() as u64;
      info!(
        run_id = %run.run_id,
        node_id = %node.node_id,
        instance_id = %instance_id,
        duration_ms,
        "node_completed"
      );
      run.emit(ExecutionEvent::NodeCompleted {
        run_id: run.run_id.clone(),
        node_id: node.node_id.clone(),
        instance_id: instance_id.clone(),
        duration_ms,
      });
      if route {
        let message = Message::complete(&node.node_id, &instance_id, output);
        run.router.route(&message, &run.queues, &run.dead_letters);
      }
    }
    Settled::Failed { error, faulted } => {
      error!(
        run_id = %run.run_id,
        node_id = %node.node_id,
        instance_id = %instance_id,
        error = %error,
        faulted,
        after_cancel = finished == FinishOutcome::FailedAfterCancel,
        "node_failed"
      );
      run.emit(ExecutionEvent::NodeFailed {
        run_id: run.run_id.clone(),
        node_id: node.node_id.clone(),
        instance_id: instance_id.clone(),
        error: error.clone(),
      });
      if route {
        let reason = format!("upstream node '{}' failed", node.node_id);
        let fail = Message::fail(&node.node_id, &instance_id, error, message_fault);
        run.router.route(&fail, &run.queues, &run.dead_letters);
        let cancel = Message::cancel(&node.node_id, Some(instance_id), reason, true);
        run.router.route(&cancel, &run.queues, &run.dead_letters);
      }
    }
    Settled::Cancelled { reason } => {
      info!(
        run_id = %run.run_id,
        node_id = %node.node_id,
        instance_id = %instance_id,
        reason = %reason,
        "node_cancelled"
      );
      run.emit(ExecutionEvent::NodeCancelled {
        run_id: run.run_id.clone(),
        node_id: node.node_id.clone(),
        instance_id: instance_id.clone(),
        reason: reason.clone(),
      });
      if route {
        let cancel = Message::cancel(&node.node_id, Some(instance_id), reason, false);
        run.router.route(&cancel, &run.queues, &run.dead_letters);
      }
    }
  }
}

/// Call the executor, turning errors and panics into a failed outcome.
async fn invoke(
  executor: &dyn NodeExecutor,
  scope: &RunScope,
  ctx: &mut NodeExecutionContext,
) -> (Settled, Option<String>, DateTime<Utc>) {
  let result = AssertUnwindSafe(executor.execute(scope, ctx))
    .catch_unwind()
    .await;

  match result {
    Ok(Ok(outcome)) => {
      let settled = match outcome.status {
        OutcomeStatus::Completed => Settled::Completed,
        OutcomeStatus::Failed => Settled::Failed {
          error: outcome
            .error
            .unwrap_or_else(|| "node reported failure".to_string()),
          faulted: false,
        },
      };
      (settled, outcome.fault, outcome.ended_at)
    }
    Ok(Err(NodeError::Cancelled)) => (
      Settled::Cancelled {
        reason: NodeError::Cancelled.to_string(),
      },
      None,
      Utc::now(),
    ),
    Ok(Err(e)) => (
      Settled::Failed {
        error: e.to_string(),
        faulted: true,
      },
      Some(format!("{e:?}")),
      Utc::now(),
    ),
    Err(panic) => {
      let message = panic_message(panic.as_ref());
      (
        Settled::Failed {
          error: message.clone(),
          faulted: true,
        },
        Some(format!("panic: {message}")),
        Utc::now(),
      )
    }
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "node executor panicked".to_string()
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;
  use std::time::Duration;

  use switchyard_config::{ConnectionDef, NodeDef, WorkflowDef};
  use switchyard_workflow::Workflow;
  use tokio_util::sync::CancellationToken;

  use super::*;
  use crate::config::EngineConfig;
  use crate::events::Notifiers;

  fn create_run(def: WorkflowDef) -> Arc<RunState> {
    let workflow = Workflow::lock(def).unwrap();
    let config = EngineConfig {
      idle_sweep_ms: 1,
      ..EngineConfig::default()
    };
    Arc::new(RunState::new(
      "run-1".to_string(),
      Arc::new(workflow),
      HashMap::new(),
      CancellationToken::new(),
      Notifiers::default(),
      config,
    ))
  }

  #[tokio::test]
  async fn test_unbound_executor_fails_node_and_drains() {
    let run = create_run(
      WorkflowDef::new("unbound", "Unbound")
        .node(NodeDef::new("A", "noop"))
        .node(NodeDef::new("B", "noop"))
        .connect(ConnectionDef::new("A", "B")),
    );
    run
      .queue("A")
      .unwrap()
      .enqueue(Message::start("run-1", Arc::new(DataBag::new())))
      .unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(5), Dispatcher::new(Arc::clone(&run)).run())
      .await
      .unwrap();

    assert_eq!(exit, DispatchExit::Drained);
    let a = run.instances.get("A").unwrap();
    assert_eq!(a.status, NodeStatus::Failed);
    assert!(a.error.unwrap().contains("no executor"));
    assert_eq!(run.instances.status("B"), Some(NodeStatus::Cancelled));
    assert_eq!(run.queue("A").unwrap().in_flight(), 0);
  }

  #[tokio::test]
  async fn test_cancelled_token_stops_dispatch() {
    let run = create_run(WorkflowDef::new("idle", "Idle").node(NodeDef::new("A", "noop")));
    run.cancel.cancel();

    let exit = Dispatcher::new(run).run().await;
    assert_eq!(exit, DispatchExit::Cancelled);
  }
}
