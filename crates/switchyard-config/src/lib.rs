//! Switchyard Config
//!
//! This crate contains the serializable workflow definition types for switchyard.
//! These types describe a workflow before it is validated and locked by
//! `switchyard-workflow`.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI with `switchyard run workflow.json`)
//! - Any other serde format, or built programmatically with the helpers on
//!   [`NodeDef`] and [`ConnectionDef`]
//!
//! The node `config` is opaque to the engine; it is handed to whichever
//! executor the node's `executor` discriminator names.

mod connection;
mod enums;
mod node;
mod workflow;

pub use connection::ConnectionDef;
pub use enums::{JoinStrategy, MessageKind};
pub use node::NodeDef;
pub use workflow::WorkflowDef;
