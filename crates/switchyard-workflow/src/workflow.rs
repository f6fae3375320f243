use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use switchyard_config::{ConnectionDef, JoinStrategy, WorkflowDef};

use crate::error::WorkflowError;
use crate::graph::Graph;

/// A node of a locked workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  pub name: String,
  pub join: JoinStrategy,
  pub executor: String,
  pub config: serde_json::Value,
}

/// A locked workflow ready for execution.
#[derive(Debug, Clone)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  pub timeout_ms: Option<u64>,
  nodes: Vec<Node>,
  index: HashMap<String, usize>,
  connections: Vec<ConnectionDef>,
  graph: Graph,
}

impl Workflow {
  /// Validate a definition and lock it for execution.
  pub fn lock(def: WorkflowDef) -> Result<Self, WorkflowError> {
    if def.nodes.is_empty() {
      return Err(WorkflowError::Empty);
    }

    let mut index = HashMap::with_capacity(def.nodes.len());
    let mut nodes = Vec::with_capacity(def.nodes.len());
    for node_def in def.nodes {
      if index.contains_key(&node_def.node_id) {
        return Err(WorkflowError::DuplicateNode(node_def.node_id));
      }
      index.insert(node_def.node_id.clone(), nodes.len());
      nodes.push(Node {
        name: node_def.display_name().to_string(),
        node_id: node_def.node_id,
        join: node_def.join,
        executor: node_def.executor,
        config: node_def.config,
      });
    }

    for conn in &def.connections {
      if !index.contains_key(&conn.from) || !index.contains_key(&conn.to) {
        return Err(WorkflowError::InvalidConnection {
          from: conn.from.clone(),
          to: conn.to.clone(),
        });
      }
    }

    if let Some(entry) = &def.entry_point {
      if !index.contains_key(entry) {
        return Err(WorkflowError::UnknownEntryPoint(entry.clone()));
      }
    }

    // Duplicate (from, to, on) triples would deliver the same message twice.
    let mut seen = HashSet::new();
    let enabled: Vec<_> = def
      .connections
      .iter()
      .filter(|c| c.enabled)
      .filter(|c| seen.insert((c.from.clone(), c.to.clone(), c.on)))
      .map(|c| (c.from.clone(), c.to.clone(), c.on))
      .collect();

    let graph = Graph::new(&nodes, &enabled, def.entry_point.as_deref());
    if graph.entry_points().is_empty() {
      return Err(WorkflowError::NoEntryPoints);
    }

    Ok(Self {
      workflow_id: def.workflow_id,
      name: def.name,
      timeout_ms: def.timeout_ms,
      nodes,
      index,
      connections: def.connections,
      graph,
    })
  }

  /// The traversal graph built at lock time.
  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// Nodes in definition order.
  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  /// Get a node by ID.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.index.get(node_id).map(|&i| &self.nodes[i])
  }

  /// All connections as defined, including disabled ones.
  pub fn connections(&self) -> &[ConnectionDef] {
    &self.connections
  }
}

#[cfg(test)]
mod tests {
  use switchyard_config::{MessageKind, NodeDef};

  use super::*;

  fn diamond() -> WorkflowDef {
    WorkflowDef::new("wf", "Diamond")
      .node(NodeDef::new("a", "noop"))
      .node(NodeDef::new("b", "noop"))
      .node(NodeDef::new("c", "noop"))
      .node(NodeDef::new("d", "noop").with_join(JoinStrategy::All))
      .connect(ConnectionDef::new("a", "b"))
      .connect(ConnectionDef::new("a", "c"))
      .connect(ConnectionDef::new("b", "d"))
      .connect(ConnectionDef::new("c", "d"))
  }

  #[test]
  fn test_lock_diamond() {
    let workflow = Workflow::lock(diamond()).unwrap();
    let graph = workflow.graph();

    assert_eq!(graph.entry_points(), ["a".to_string()]);
    assert_eq!(graph.upstream("d").len(), 2);
    assert!(graph.is_join_point("d"));
    assert!(!graph.is_join_point("b"));
    assert_eq!(graph.downstream("a").len(), 2);
    assert_eq!(workflow.get_node("d").unwrap().join, JoinStrategy::All);
  }

  #[test]
  fn test_duplicate_node_rejected() {
    let def = diamond().node(NodeDef::new("a", "noop"));
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::DuplicateNode(id)) if id == "a"
    ));
  }

  #[test]
  fn test_unknown_endpoint_rejected() {
    let def = diamond().connect(ConnectionDef::new("d", "missing"));
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::InvalidConnection { to, .. }) if to == "missing"
    ));
  }

  #[test]
  fn test_no_entry_points_rejected() {
    let def = WorkflowDef::new("wf", "Cycle")
      .node(NodeDef::new("a", "noop"))
      .node(NodeDef::new("b", "noop"))
      .connect(ConnectionDef::new("a", "b"))
      .connect(ConnectionDef::new("b", "a"));
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::NoEntryPoints)
    ));
  }

  #[test]
  fn test_explicit_entry_point_overrides_discovery() {
    let def = WorkflowDef::new("wf", "Cycle")
      .node(NodeDef::new("a", "noop"))
      .node(NodeDef::new("b", "noop"))
      .connect(ConnectionDef::new("a", "b"))
      .connect(ConnectionDef::new("b", "a"))
      .with_entry_point("b");
    let workflow = Workflow::lock(def).unwrap();
    assert_eq!(workflow.graph().entry_points(), ["b".to_string()]);
  }

  #[test]
  fn test_unknown_entry_point_rejected() {
    let def = diamond().with_entry_point("zzz");
    assert!(matches!(
      Workflow::lock(def),
      Err(WorkflowError::UnknownEntryPoint(id)) if id == "zzz"
    ));
  }

  #[test]
  fn test_disabled_connection_ignored_by_graph() {
    let def = WorkflowDef::new("wf", "Disabled")
      .node(NodeDef::new("a", "noop"))
      .node(NodeDef::new("b", "noop"))
      .connect(ConnectionDef::new("a", "b").disabled());
    let workflow = Workflow::lock(def).unwrap();

    // b has no enabled incoming connection, so it is an entry point too
    assert_eq!(workflow.graph().entry_points().len(), 2);
    assert!(workflow.graph().downstream("a").is_empty());
    assert_eq!(workflow.connections().len(), 1);
  }

  #[test]
  fn test_upstream_counts_distinct_sources() {
    let def = WorkflowDef::new("wf", "Handlers")
      .node(NodeDef::new("a", "noop"))
      .node(NodeDef::new("b", "noop").with_join(JoinStrategy::All))
      .connect(ConnectionDef::new("a", "b"))
      .connect(ConnectionDef::new("a", "b").on(MessageKind::Fail))
      .connect(ConnectionDef::new("a", "b"));
    let workflow = Workflow::lock(def).unwrap();

    assert_eq!(workflow.graph().upstream("b"), ["a".to_string()]);
    // the duplicate complete connection collapses, the fail one stays
    assert_eq!(workflow.graph().downstream("a").len(), 2);
  }
}
