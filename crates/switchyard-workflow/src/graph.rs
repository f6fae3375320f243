use std::collections::{HashMap, HashSet};

use switchyard_config::MessageKind;

use crate::workflow::Node;

/// An outgoing, enabled connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
  pub target: String,
  pub on: MessageKind,
}

/// Graph structure for traversal and analysis.
///
/// Only enabled connections take part; a disabled connection behaves as if it
/// were absent.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: node_id -> outgoing edges, in definition order.
  adjacency: HashMap<String, Vec<Edge>>,
  /// Reverse adjacency: node_id -> distinct upstream node_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Nodes the run is bootstrapped from.
  entry_points: Vec<String>,
  /// Nodes with multiple distinct upstream nodes.
  join_points: HashSet<String>,
}

impl Graph {
  /// Build a graph from nodes and enabled `(from, to, on)` connections.
  ///
  /// When `entry_override` is set it is the only entry point; otherwise every
  /// node without incoming connections is one.
  pub fn new(
    nodes: &[Node],
    connections: &[(String, String, MessageKind)],
    entry_override: Option<&str>,
  ) -> Self {
    let mut adjacency: HashMap<String, Vec<Edge>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for node in nodes {
      adjacency.entry(node.node_id.clone()).or_default();
      reverse_adjacency.entry(node.node_id.clone()).or_default();
    }

    for (from, to, on) in connections {
      adjacency.entry(from.clone()).or_default().push(Edge {
        target: to.clone(),
        on: *on,
      });
      let upstream = reverse_adjacency.entry(to.clone()).or_default();
      if !upstream.contains(from) {
        upstream.push(from.clone());
      }
    }

    let entry_points: Vec<String> = match entry_override {
      Some(entry) => vec![entry.to_string()],
      None => nodes
        .iter()
        .filter(|n| {
          reverse_adjacency
            .get(&n.node_id)
            .is_none_or(|v| v.is_empty())
        })
        .map(|n| n.node_id.clone())
        .collect(),
    };

    let join_points: HashSet<String> = reverse_adjacency
      .iter()
      .filter(|(_, incoming)| incoming.len() > 1)
      .map(|(id, _)| id.clone())
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
      join_points,
    }
  }

  /// Get entry points.
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get outgoing edges for a given node.
  pub fn downstream(&self, node_id: &str) -> &[Edge] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get distinct upstream nodes for a given node.
  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Check if a node is a join point (has multiple upstream nodes).
  pub fn is_join_point(&self, node_id: &str) -> bool {
    self.join_points.contains(node_id)
  }

  /// Get all join points.
  pub fn join_points(&self) -> &HashSet<String> {
    &self.join_points
  }
}
