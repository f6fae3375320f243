//! Switchyard Workflow
//!
//! This crate provides the "locked" workflow representation for switchyard.
//! A locked workflow is a validated form of a [`WorkflowDef`] that is ready
//! for execution.
//!
//! Key differences from `switchyard-config`:
//! - Node IDs are unique and every enabled connection references known nodes
//! - Disabled connections are dropped from the traversal graph
//! - Entry points and join points are identified once, up front
//!
//! [`WorkflowDef`]: switchyard_config::WorkflowDef

mod error;
mod graph;
mod workflow;

pub use error::WorkflowError;
pub use graph::{Edge, Graph};
pub use switchyard_config::{JoinStrategy, MessageKind};
pub use workflow::{Node, Workflow};
