/*!
SQLite checkpoint store.

Durable implementation of [`Checkpointer`] and [`LeaseStore`] over a single
SQLite database with its own small connection pool. The pool is opened by the
explicit async [`SqliteCheckpointStore::connect`] (construction never opens
connections), and embedded migrations from `checkpoint_migrations/` run on
connect.

## Schema mapping

- `workflow_checkpoints (workflow_id, seq, step, snapshot, created_at)`:
  append-only log; `seq` increases per workflow and `load_latest` reads the
  max-`seq` row.
- `workflow_leases (workflow_id, worker_id, expires_at)`: advisory leases;
  expired rows are overwritten on acquire.

Snapshots are the serde JSON form of [`crate::state::WorkflowState`]. Readers
must tolerate unknown fields, which serde provides by default.
*/

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

use super::{Checkpoint, Checkpointer, CheckpointerError, LeaseStore, Result};
use crate::state::WorkflowState;
use crate::types::WorkflowStep;

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointStore").finish()
    }
}

impl SqliteCheckpointStore {
    /// Connect (or create) the checkpoint database at `database_url` with a
    /// pool of `max_connections`, and run embedded migrations.
    ///
    /// Example URL: `"sqlite://roadweave_checkpoints.db"`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CheckpointerError::Backend {
                message: format!("url parse: {e}"),
            })?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("connect: {e}"),
            })?;
        sqlx::migrate!("./checkpoint_migrations")
            .run(&pool)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("migration failure: {e}"),
            })?;
        Ok(Self { pool })
    }

    fn row_to_checkpoint(row: &SqliteRow) -> Result<Checkpoint> {
        let workflow_id: String = row.get("workflow_id");
        let step_raw: String = row.get("step");
        let snapshot: String = row.get("snapshot");
        let created_at_raw: String = row.get("created_at");

        let state: WorkflowState =
            serde_json::from_str(&snapshot).map_err(|e| CheckpointerError::Codec {
                message: format!("snapshot decode: {e}"),
            })?;
        let step = WorkflowStep::decode(&step_raw).unwrap_or(WorkflowStep::End);
        let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Checkpoint {
            workflow_id,
            step,
            state,
            created_at,
        })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointStore {
    #[instrument(skip(self, checkpoint), fields(workflow_id = %checkpoint.workflow_id), err)]
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let snapshot =
            serde_json::to_string(&checkpoint.state).map_err(|e| CheckpointerError::Codec {
                message: format!("snapshot encode: {e}"),
            })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("tx begin: {e}"),
            })?;

        let next_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM workflow_checkpoints WHERE workflow_id = ?1",
        )
        .bind(&checkpoint.workflow_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("next seq: {e}"),
        })?;

        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (workflow_id, seq, step, snapshot, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&checkpoint.workflow_id)
        .bind(next_seq)
        .bind(checkpoint.step.encode())
        .bind(&snapshot)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("insert checkpoint: {e}"),
        })?;

        tx.commit().await.map_err(|e| CheckpointerError::Backend {
            message: format!("tx commit: {e}"),
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, workflow_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, step, snapshot, created_at
            FROM workflow_checkpoints
            WHERE workflow_id = ?1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select latest: {e}"),
        })?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self, workflow_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, step, snapshot, created_at
            FROM workflow_checkpoints
            WHERE workflow_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select log: {e}"),
        })?;

        rows.iter().map(Self::row_to_checkpoint).collect()
    }
}

#[async_trait]
impl LeaseStore for SqliteCheckpointStore {
    #[instrument(skip(self, ttl), err)]
    async fn try_acquire(
        &self,
        workflow_id: &str,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(900));

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("tx begin: {e}"),
            })?;

        let existing: Option<SqliteRow> =
            sqlx::query("SELECT worker_id, expires_at FROM workflow_leases WHERE workflow_id = ?1")
                .bind(workflow_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("select lease: {e}"),
                })?;

        if let Some(row) = existing {
            let holder: String = row.get("worker_id");
            let held_until_raw: String = row.get("expires_at");
            let held_until = DateTime::parse_from_rfc3339(&held_until_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);
            if holder != worker_id && held_until > now {
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO workflow_leases (workflow_id, worker_id, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (workflow_id)
            DO UPDATE SET worker_id = excluded.worker_id, expires_at = excluded.expires_at
            "#,
        )
        .bind(workflow_id)
        .bind(worker_id)
        .bind(expires_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("upsert lease: {e}"),
        })?;

        tx.commit().await.map_err(|e| CheckpointerError::Backend {
            message: format!("tx commit: {e}"),
        })?;
        Ok(true)
    }

    #[instrument(skip(self), err)]
    async fn release(&self, workflow_id: &str, worker_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM workflow_leases WHERE workflow_id = ?1 AND worker_id = ?2")
            .bind(workflow_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("delete lease: {e}"),
            })?;
        Ok(())
    }
}
