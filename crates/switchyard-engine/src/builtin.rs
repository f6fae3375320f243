//! Built-in executors.
//!
//! | name    | config                              | behaviour                          |
//! |---------|-------------------------------------|------------------------------------|
//! | `noop`  | -                                   | copies input to output             |
//! | `set`   | `{ "values": { .. } }`              | writes the values to output        |
//! | `delay` | `{ "ms": 100, "values": { .. } }`   | sleeps, then behaves like `set`    |
//! | `fail`  | `{ "error": ".." }`                 | reports a Failed outcome           |
//! | `error` | `{ "error": ".." }`                 | raises a [`NodeError`]             |

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::data::{DataBag, NodeExecutionContext};
use crate::executor::{ExecutorRegistry, NodeError, NodeExecutor, NodeOutcome, RunScope};

pub(crate) fn register(registry: &mut ExecutorRegistry) {
  registry.register("noop", Noop);
  registry.register("set", Set);
  registry.register("delay", Delay);
  registry.register("fail", Fail);
  registry.register("error", RaiseError);
}

fn parse_config<T: DeserializeOwned + Default>(scope: &RunScope) -> Result<T, NodeError> {
  if scope.node.config.is_null() {
    return Ok(T::default());
  }
  serde_json::from_value(scope.node.config.clone()).map_err(|e| NodeError::InvalidConfig {
    node_id: scope.node.node_id.clone(),
    message: e.to_string(),
  })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SetConfig {
  values: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DelayConfig {
  ms: u64,
  values: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorConfig {
  error: Option<String>,
}

/// Passes its input straight through.
pub struct Noop;

#[async_trait]
impl NodeExecutor for Noop {
  async fn execute(
    &self,
    _scope: &RunScope,
    ctx: &mut NodeExecutionContext,
  ) -> Result<NodeOutcome, NodeError> {
    ctx.output = ctx.input.clone();
    Ok(NodeOutcome::completed())
  }
}

/// Writes configured values on top of its input.
pub struct Set;

#[async_trait]
impl NodeExecutor for Set {
  async fn execute(
    &self,
    scope: &RunScope,
    ctx: &mut NodeExecutionContext,
  ) -> Result<NodeOutcome, NodeError> {
    let config: SetConfig = parse_config(scope)?;
    ctx.output = ctx.input.clone();
    ctx
      .output
      .extend_from(&DataBag::from_json(serde_json::Value::Object(config.values)));
    Ok(NodeOutcome::completed())
  }
}

/// Sleeps for `ms`, giving up early if the run is cancelled.
pub struct Delay;

#[async_trait]
impl NodeExecutor for Delay {
  async fn execute(
    &self,
    scope: &RunScope,
    ctx: &mut NodeExecutionContext,
  ) -> Result<NodeOutcome, NodeError> {
    let config: DelayConfig = parse_config(scope)?;

    tokio::select! {
      _ = tokio::time::sleep(Duration::from_millis(config.ms)) => {}
      _ = scope.cancel.cancelled() => return Err(NodeError::Cancelled),
    }

    ctx.output = ctx.input.clone();
    ctx
      .output
      .extend_from(&DataBag::from_json(serde_json::Value::Object(config.values)));
    Ok(NodeOutcome::completed())
  }
}

/// Reports failure through the outcome.
pub struct Fail;

#[async_trait]
impl NodeExecutor for Fail {
  async fn execute(
    &self,
    scope: &RunScope,
    _ctx: &mut NodeExecutionContext,
  ) -> Result<NodeOutcome, NodeError> {
    let config: ErrorConfig = parse_config(scope)?;
    let error = config
      .error
      .unwrap_or_else(|| format!("node '{}' failed", scope.node.node_id));
    Ok(NodeOutcome::failed(error))
  }
}

/// Faults with a [`NodeError`].
pub struct RaiseError;

#[async_trait]
impl NodeExecutor for RaiseError {
  async fn execute(
    &self,
    scope: &RunScope,
    _ctx: &mut NodeExecutionContext,
  ) -> Result<NodeOutcome, NodeError> {
    let config: ErrorConfig = parse_config(scope)?;
    let error = config
      .error
      .unwrap_or_else(|| format!("node '{}' raised an error", scope.node.node_id));
    Err(NodeError::Execution(error))
  }
}
