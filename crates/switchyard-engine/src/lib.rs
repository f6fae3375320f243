//! Switchyard Workflow Engine
//!
//! This crate drives a locked workflow to completion by passing terminal
//! messages between per-node queues. Nodes fan out in parallel, fan in through
//! "all" joins, and a failing node cancels everything downstream of it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                         │
//! │  - owns mpsc channel (sender + receiver)                    │
//! │  - one run per received payload                             │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                         │
//! │  - start / spawn / cancel / status / wait_for_completion    │
//! │  - validation, bootstrap, whole-run timeout                 │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Dispatcher                            │
//! │  - sweeps NodeQueues, consults the JoinTracker              │
//! │  - spawns NodeExecutor tasks, routes Complete/Fail/Cancel   │
//! │    through the MessageRouter (dead letters on failure)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use switchyard_engine::{EngineConfig, ExecutorRegistry, StartOptions, WorkflowEngine};
//!
//! let engine = WorkflowEngine::new(EngineConfig::default(), ExecutorRegistry::with_builtins());
//! let result = engine.start(definition, StartOptions::new()).await?;
//! println!("{}", result.status);
//! ```

mod builtin;
mod config;
mod data;
mod dead_letter;
mod dispatch;
mod engine;
mod error;
mod events;
mod executor;
mod instance;
mod join;
mod message;
mod queue;
mod router;
mod run;
mod runner;

pub use builtin::{Delay, Fail, Noop, RaiseError, Set};
pub use config::EngineConfig;
pub use data::{DataBag, NodeExecutionContext};
pub use dead_letter::{DeadLetter, DeadLetterSink};
pub use engine::{RunHandle, StartOptions, WorkflowEngine};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{ExecutorRegistry, NodeError, NodeExecutor, NodeOutcome, OutcomeStatus, RunScope};
pub use instance::{NodeInstance, NodeStatus};
pub use join::{JoinDecision, JoinTracker};
pub use message::{Message, START_SOURCE};
pub use queue::{DEFAULT_QUEUE_CAPACITY, Lease, NodeQueue, QueueError};
pub use router::{MessageRouter, Route};
pub use run::{RunResult, RunStatus};
pub use runner::{RunnerClosed, WorkflowRunner};

// Re-export the definition and workflow types callers need to build runs.
pub use switchyard_config::{ConnectionDef, JoinStrategy, MessageKind, NodeDef, WorkflowDef};
pub use switchyard_workflow::{Node, Workflow, WorkflowError};
