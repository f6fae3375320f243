use serde::{Deserialize, Serialize};

use crate::connection::ConnectionDef;
use crate::node::NodeDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub connections: Vec<ConnectionDef>,
  /// Overrides entry point discovery when set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entry_point: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

impl WorkflowDef {
  pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      name: name.into(),
      nodes: Vec::new(),
      connections: Vec::new(),
      entry_point: None,
      timeout_ms: None,
    }
  }

  pub fn node(mut self, node: NodeDef) -> Self {
    self.nodes.push(node);
    self
  }

  pub fn connect(mut self, connection: ConnectionDef) -> Self {
    self.connections.push(connection);
    self
  }

  pub fn with_entry_point(mut self, node_id: impl Into<String>) -> Self {
    self.entry_point = Some(node_id.into());
    self
  }
}
