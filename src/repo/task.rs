//! Task repository.
//!
//! The one non-negotiable rule here is terminal monotonicity: once a task
//! row reaches a terminal status, every write path in this module refuses to
//! change it. The guard lives in the SQL (`status NOT IN (...)`) so it holds
//! under concurrent writers, not just well-behaved callers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use super::{RepoError, RepoResult, RepoScope};
use crate::model::Task;
use crate::types::{TaskStatus, WorkflowStep};

/// SQL fragment listing the terminal statuses.
const TERMINAL: &str = "('completed', 'partial_failure', 'failed', 'rejected')";

pub struct TaskRepo;

impl TaskRepo {
    /// Insert the task, or update its mutable fields if the id exists.
    /// Terminal rows are left untouched.
    #[instrument(skip(scope, task), fields(task_id = %task.task_id), err)]
    pub async fn upsert(scope: &mut RepoScope, task: &Task) -> RepoResult<()> {
        let user_request = serde_json::to_string(&task.user_request)?;
        let error = task.error.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(&format!(
            r#"
            INSERT INTO tasks (
                task_id, user_id, task_type, user_request, status, current_step,
                roadmap_id, queue_job_id, error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (task_id) DO UPDATE SET
                status = excluded.status,
                current_step = excluded.current_step,
                roadmap_id = excluded.roadmap_id,
                queue_job_id = excluded.queue_job_id,
                error = excluded.error,
                updated_at = excluded.updated_at
            WHERE tasks.status NOT IN {TERMINAL}
            "#
        ))
        .bind(&task.task_id)
        .bind(&task.user_id)
        .bind(&task.task_type)
        .bind(&user_request)
        .bind(task.status.encode())
        .bind(task.current_step.map(|s| s.encode()))
        .bind(&task.roadmap_id)
        .bind(&task.queue_job_id)
        .bind(&error)
        .bind(task.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(scope.conn())
        .await?;
        Ok(())
    }

    #[instrument(skip(scope), err)]
    pub async fn get(scope: &mut RepoScope, task_id: &str) -> RepoResult<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(scope.conn())
            .await?
            .ok_or_else(|| RepoError::NotFound {
                entity: "task",
                key: task_id.to_string(),
            })?;
        Self::row_to_task(&row)
    }

    /// Update status / step / error payload, honoring terminal monotonicity.
    #[instrument(skip(scope, error), err)]
    pub async fn set_status(
        scope: &mut RepoScope,
        task_id: &str,
        status: TaskStatus,
        current_step: Option<WorkflowStep>,
        error: Option<&Value>,
    ) -> RepoResult<()> {
        let error = error.map(serde_json::to_string).transpose()?;
        sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = ?2,
                current_step = COALESCE(?3, current_step),
                error = COALESCE(?4, error),
                updated_at = ?5
            WHERE task_id = ?1 AND status NOT IN {TERMINAL}
            "#
        ))
        .bind(task_id)
        .bind(status.encode())
        .bind(current_step.map(|s| s.encode()))
        .bind(&error)
        .bind(Utc::now().to_rfc3339())
        .execute(scope.conn())
        .await?;
        Ok(())
    }

    /// Record the queue job currently driving this task.
    #[instrument(skip(scope), err)]
    pub async fn set_queue_job(
        scope: &mut RepoScope,
        task_id: &str,
        queue_job_id: &str,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE tasks SET queue_job_id = ?2, updated_at = ?3 WHERE task_id = ?1",
        )
        .bind(task_id)
        .bind(queue_job_id)
        .bind(Utc::now().to_rfc3339())
        .execute(scope.conn())
        .await?;
        Ok(())
    }

    /// Attach the roadmap assigned by the intent step.
    #[instrument(skip(scope), err)]
    pub async fn set_roadmap(
        scope: &mut RepoScope,
        task_id: &str,
        roadmap_id: &str,
    ) -> RepoResult<()> {
        sqlx::query("UPDATE tasks SET roadmap_id = ?2, updated_at = ?3 WHERE task_id = ?1")
            .bind(task_id)
            .bind(roadmap_id)
            .bind(Utc::now().to_rfc3339())
            .execute(scope.conn())
            .await?;
        Ok(())
    }

    /// Non-terminal tasks whose last update is older than `cutoff`.
    /// Consumed by the recovery sweeper.
    #[instrument(skip(scope), err)]
    pub async fn list_stale(
        scope: &mut RepoScope,
        cutoff: DateTime<Utc>,
    ) -> RepoResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM tasks WHERE status NOT IN {TERMINAL} AND updated_at < ?1"
        ))
        .bind(cutoff.to_rfc3339())
        .fetch_all(scope.conn())
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    fn row_to_task(row: &SqliteRow) -> RepoResult<Task> {
        let user_request: String = row.get("user_request");
        let error: Option<String> = row.get("error");
        let status_raw: String = row.get("status");
        let step_raw: Option<String> = row.get("current_step");
        Ok(Task {
            task_id: row.get("task_id"),
            user_id: row.get("user_id"),
            task_type: row.get("task_type"),
            user_request: serde_json::from_str(&user_request)?,
            status: TaskStatus::decode(&status_raw).unwrap_or(TaskStatus::Failed),
            current_step: step_raw.as_deref().and_then(WorkflowStep::decode),
            roadmap_id: row.get("roadmap_id"),
            queue_job_id: row.get("queue_job_id"),
            error: error.as_deref().map(serde_json::from_str).transpose()?,
            created_at: parse_ts(row.get("created_at")),
            updated_at: parse_ts(row.get("updated_at")),
        })
    }
}

pub(crate) fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
