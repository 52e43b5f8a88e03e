//! Typed data access over the business store.
//!
//! One repository module per entity, all sharing two rules:
//!
//! 1. **No repository commits.** Every method takes a [`RepoScope`], a live
//!    transaction handed out by [`RepoFactory::begin`], and the caller
//!    decides when to commit or roll back. This is what lets the content
//!    worker batch a whole artifact kind into a single transaction.
//! 2. **Writes are upserts.** Uniquely-keyed entities update in place when
//!    the key exists and insert otherwise, so at-least-once job delivery is
//!    harmless. Unique-index conflicts are absorbed by the upsert SQL and
//!    never surface as errors.
//!
//! The factory owns the pool; it is opened by the explicit async
//! [`RepoFactory::connect`], never during construction.

pub mod content;
pub mod misc;
pub mod roadmap;
pub mod task;
pub mod tutorial;

use miette::Diagnostic;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use crate::config::PoolConfig;

pub use content::{QuizRepo, ResourceRepo};
pub use misc::{ExecutionLogRepo, IntentRepo, UserProfileRepo};
pub use roadmap::RoadmapRepo;
pub use task::TaskRepo;
pub use tutorial::TutorialRepo;

/// How long a scope may wait for a pooled connection before failing.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Diagnostic)]
pub enum RepoError {
    /// A read-by-key found nothing.
    #[error("{entity} not found: {key}")]
    #[diagnostic(code(roadweave::repo::not_found))]
    NotFound { entity: &'static str, key: String },

    /// Database error.
    #[error("database error: {0}")]
    #[diagnostic(code(roadweave::repo::backend))]
    Backend(#[from] sqlx::Error),

    /// Embedded migration failure at pool open.
    #[error("migration error: {0}")]
    #[diagnostic(code(roadweave::repo::migrate))]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON column (de)serialization failure.
    #[error("column codec error: {0}")]
    #[diagnostic(code(roadweave::repo::codec))]
    Codec(#[from] serde_json::Error),
}

pub type RepoResult<T> = std::result::Result<T, RepoError>;

/// Owns the business connection pool and hands out transactional scopes.
pub struct RepoFactory {
    pool: SqlitePool,
}

impl RepoFactory {
    /// Open the pool and run embedded migrations. The pool is sized to
    /// `max_connections + max_overflow`, the budget audited by
    /// [`crate::config::EngineConfig::validate`].
    #[instrument(skip(config), err)]
    pub async fn connect(config: &PoolConfig) -> RepoResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections + config.max_overflow)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Begin a transactional scope. The caller must `commit` (or drop to
    /// roll back); the acquire timeout bounds how long this can block.
    pub async fn begin(&self) -> RepoResult<RepoScope> {
        Ok(RepoScope {
            tx: self.pool.begin().await?,
        })
    }

    /// Close the pool. Outstanding scopes fail fast afterwards.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

/// One transaction, owned by the caller.
///
/// Dropping an uncommitted scope rolls the transaction back, so error paths
/// release their connection without any explicit cleanup.
pub struct RepoScope {
    tx: Transaction<'static, Sqlite>,
}

impl RepoScope {
    /// The connection repositories execute against.
    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> RepoResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> RepoResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
