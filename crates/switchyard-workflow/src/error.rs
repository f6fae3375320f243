use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("workflow has no nodes")]
  Empty,

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("connection references unknown node: from={from}, to={to}")]
  InvalidConnection { from: String, to: String },

  #[error("entry point references unknown node: {0}")]
  UnknownEntryPoint(String),

  #[error("no entry points found (all nodes have incoming connections)")]
  NoEntryPoints,
}
