//! # Roadweave: Checkpointed Multi-Agent Roadmap Workflows
//!
//! Roadweave orchestrates a sequence of LLM agents into a long-lived,
//! resumable workflow that turns a learning request into a personalized
//! roadmap: intent analysis → curriculum design → structure validation →
//! optional editing → human review → parallel content generation
//! (tutorials, external resources, quizzes).
//!
//! ## Core Concepts
//!
//! - **Nodes**: one runner per workflow step, pure over a state snapshot
//! - **Router**: a total function `(state, config) → next step`
//! - **Checkpoints**: a snapshot after every node; any crash resumes from
//!   the latest entry with no duplicated writes
//! - **Dual store**: detail rows are the source of truth, the framework
//!   tree carries their status projection
//! - **Fan-out**: per-artifact-kind semaphores bound concurrent LLM calls;
//!   one transaction per kind persists the results
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roadweave::config::EngineConfig;
//! use roadweave::engine::Engine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! roadweave::telemetry::init_tracing();
//!
//! let engine = Engine::init(EngineConfig::from_env()?).await?;
//! let task_id = engine
//!     .handler()
//!     .submit("user-1", serde_json::json!({"goal": "Learn Rust"}), None)
//!     .await?;
//!
//! let mut progress = engine.handler().stream_progress(&task_id).await?;
//! while let Some(event) = progress.recv().await {
//!     println!("{event:?}");
//!     if event.closes_stream() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Semantics
//!
//! Failures are classified, not improvised: transient dependency errors
//! retry with exponential backoff, unparseable model output earns one
//! re-prompt, invalid documents surface immediately, cancellation
//! checkpoints and exits cleanly, and anything fatal marks the task failed
//! with the error payload on the row. Content fan-out tolerates partial
//! failure: the task resolves to `partial_failure` listing the failed
//! concepts, and callers recover via `retry_failed` / `regenerate_concept`.
//!
//! ## Module Guide
//!
//! - [`types`] - step/status/artifact vocabularies
//! - [`model`] - domain documents (tasks, frameworks, detail rows)
//! - [`state`] - workflow state and the patch model
//! - [`repo`] - scope-passing repositories over the business store
//! - [`agents`] - agent contracts, factory, parser pipeline, tool loop
//! - [`checkpoint`] - checkpoint log and advisory leases
//! - [`queue`] - logs/content queue adapter
//! - [`events`] - progress events and the notification bus
//! - [`runtime`] - runners, router, executor, fan-out, recovery
//! - [`handler`] - the request façade
//! - [`engine`] - process lifecycle

pub mod agents;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod events;
pub mod handler;
pub mod model;
pub mod queue;
pub mod repo;
pub mod runtime;
pub mod state;
pub mod telemetry;
pub mod types;
