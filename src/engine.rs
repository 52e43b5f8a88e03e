//! Process-wide lifecycle.
//!
//! [`Engine::init`] is the single place pools are opened, factories are
//! built, and background roles (content worker, logs worker, recovery
//! sweeper) are spawned. Nothing is constructed implicitly during request
//! handling; [`Engine::shutdown`] cancels the workers and closes the pools.

use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agents::{AgentError, AgentFactory, Agents};
use crate::checkpoint::{Checkpointer, CheckpointerError, LeaseStore, SqliteCheckpointStore};
use crate::config::{ConfigError, EngineConfig};
use crate::events::NotificationBus;
use crate::handler::RequestHandler;
use crate::queue::{InProcessQueue, TaskQueue};
use crate::repo::{RepoError, RepoFactory};
use crate::runtime::content::{ContentEngine, NoopObjectStore, ObjectStore};
use crate::runtime::executor::WorkflowExecutor;
use crate::runtime::recovery::RecoverySweeper;
use crate::runtime::workers::{run_content_worker, run_logs_worker};
use crate::runtime::{CancelHandle, StateManager, cancel_pair};

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(code(roadweave::engine::config))]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::engine::repo))]
    Repo(#[from] RepoError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::engine::checkpoint))]
    Checkpoint(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(code(roadweave::engine::agents))]
    Agents(#[from] AgentError),
}

pub struct Engine {
    handler: RequestHandler,
    executor: Arc<WorkflowExecutor>,
    repos: Arc<RepoFactory>,
    cancel: CancelHandle,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Validate the configuration, open both pools, build every factory,
    /// and spawn the background roles.
    pub async fn init(config: EngineConfig) -> Result<Self, EngineError> {
        Self::init_with_object_store(config, Arc::new(NoopObjectStore)).await
    }

    /// Like [`Engine::init`] with an explicit object store for tutorial
    /// bodies.
    pub async fn init_with_object_store(
        config: EngineConfig,
        object_store: Arc<dyn ObjectStore>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let config = Arc::new(config);

        let repos = Arc::new(RepoFactory::connect(&config.database).await?);
        let checkpoint_store = Arc::new(
            SqliteCheckpointStore::connect(
                &config.checkpoint.url,
                config.checkpoint.max_connections,
            )
            .await?,
        );
        let checkpointer: Arc<dyn Checkpointer> = checkpoint_store.clone();
        let leases: Arc<dyn LeaseStore> = checkpoint_store;

        let agents = Arc::new(Agents::new(AgentFactory::from_config(
            &config.agents,
            config.timeouts.llm_call,
        )?));
        let queue: Arc<dyn TaskQueue> = Arc::new(InProcessQueue::new());
        let bus = Arc::new(NotificationBus::new());
        let state_manager = Arc::new(StateManager::new());

        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&repos),
            Arc::clone(&agents),
            Arc::clone(&queue),
            Arc::clone(&bus),
            Arc::clone(&checkpointer),
            Arc::clone(&state_manager),
            Arc::clone(&config),
        ));
        let content = Arc::new(ContentEngine::new(
            Arc::clone(&repos),
            Arc::clone(&agents),
            Arc::clone(&bus),
            Arc::clone(&checkpointer),
            object_store,
            Arc::clone(&config),
        ));

        let (cancel, token) = cancel_pair();
        let mut workers = Vec::new();
        workers.push(tokio::spawn(run_content_worker(
            Arc::clone(&queue),
            Arc::clone(&executor),
            Arc::clone(&content),
            token.clone(),
        )));
        workers.push(tokio::spawn(run_logs_worker(
            Arc::clone(&queue),
            Arc::clone(&repos),
            token.clone(),
        )));

        if config.recovery.enable {
            let sweeper = RecoverySweeper::new(
                Arc::clone(&repos),
                Arc::clone(&checkpointer),
                leases,
                Arc::clone(&queue),
                config.recovery.clone(),
                config.timeouts.workflow_budget,
                format!("worker-{}", Uuid::new_v4()),
            );
            let sweep_token = token.clone();
            workers.push(tokio::spawn(async move {
                sweeper.run(sweep_token).await;
            }));
        }

        let handler = RequestHandler::new(
            Arc::clone(&repos),
            queue,
            bus,
            Arc::clone(&executor),
            state_manager,
            token,
        );

        Ok(Self {
            handler,
            executor,
            repos,
            cancel,
            workers,
        })
    }

    /// The request façade.
    #[must_use]
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Direct executor access (used by embedding processes that drive
    /// workflows without the queue).
    #[must_use]
    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    /// Cancel the workers, wait for them, and close the pools.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for worker in self.workers {
            let _ = worker.await;
        }
        self.repos.shutdown().await;
    }
}
