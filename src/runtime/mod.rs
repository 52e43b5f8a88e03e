//! Workflow runtime: nodes, routing, execution, fan-out, recovery.
//!
//! The pieces compose in one direction:
//!
//! - [`node`] defines the [`node::NodeRunner`] contract and the execution
//!   context handed to every runner;
//! - [`nodes`] implements the six runners;
//! - [`router`] is the pure function deciding which runner goes next;
//! - [`error_handler`] wraps each runner invocation with the retry taxonomy;
//! - [`executor`] binds all of the above around the checkpointer and the
//!   live-step [`state_manager`];
//! - [`content`] is the bounded-concurrency fan-out driven by the content
//!   worker;
//! - [`workers`] are the queue poll loops; [`recovery`] re-enqueues stalled
//!   work on startup and periodically.

pub mod cancel;
pub mod content;
pub mod error_handler;
pub mod executor;
pub mod node;
pub mod nodes;
pub mod recovery;
pub mod router;
pub mod state_manager;
pub mod workers;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use content::{ContentEngine, ContentError, ContentJobSpec, NoopObjectStore, ObjectStore};
pub use error_handler::{FailureKind, NodeFailure, RetryPolicy, classify, handle_node_execution};
pub use executor::{ExecutorError, RunOutcome, WorkflowExecutor};
pub use node::{NodeContext, NodeError, NodeOutcome, NodeRunner};
pub use recovery::{RecoverySweeper, SweepReport};
pub use state_manager::StateManager;
