//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Tuning knobs for the dispatch loop. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Pending messages a node queue holds before rejecting more.
  pub queue_capacity: usize,
  /// Sleep between sweeps that found no work.
  pub idle_sweep_ms: u64,
  /// Poll interval while waiting for node instances to settle.
  pub completion_poll_ms: u64,
  /// Give up waiting for node instances to settle after this long.
  pub completion_ceiling_ms: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      idle_sweep_ms: 10,
      completion_poll_ms: 100,
      completion_ceiling_ms: 30_000,
    }
  }
}

impl EngineConfig {
  pub fn idle_sweep(&self) -> Duration {
    Duration::from_millis(self.idle_sweep_ms)
  }

  pub fn completion_poll(&self) -> Duration {
    Duration::from_millis(self.completion_poll_ms)
  }

  pub fn completion_ceiling(&self) -> Duration {
    Duration::from_millis(self.completion_ceiling_ms)
  }
}
