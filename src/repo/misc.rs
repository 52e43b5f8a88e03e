//! Intent analysis, user profile, and execution log repositories.

use chrono::Utc;
use sqlx::Row;
use tracing::instrument;

use super::task::parse_ts;
use super::{RepoError, RepoResult, RepoScope};
use crate::model::{ExecutionLogEntry, IntentAnalysisMetadata, UserProfile};

pub struct IntentRepo;

impl IntentRepo {
    /// Upsert by task id; a repeated save replaces the analysis document.
    #[instrument(skip(scope, meta), fields(task_id = %meta.task_id), err)]
    pub async fn upsert(scope: &mut RepoScope, meta: &IntentAnalysisMetadata) -> RepoResult<()> {
        let analysis = serde_json::to_string(&meta.analysis)?;
        sqlx::query(
            r#"
            INSERT INTO intent_analyses (task_id, analysis, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (task_id) DO UPDATE SET
                analysis = excluded.analysis,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&meta.task_id)
        .bind(&analysis)
        .bind(meta.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(scope.conn())
        .await?;
        Ok(())
    }

    #[instrument(skip(scope), err)]
    pub async fn get(scope: &mut RepoScope, task_id: &str) -> RepoResult<IntentAnalysisMetadata> {
        let row = sqlx::query("SELECT * FROM intent_analyses WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(scope.conn())
            .await?
            .ok_or_else(|| RepoError::NotFound {
                entity: "intent analysis",
                key: task_id.to_string(),
            })?;
        let analysis: String = row.get("analysis");
        Ok(IntentAnalysisMetadata {
            task_id: row.get("task_id"),
            analysis: serde_json::from_str(&analysis)?,
            created_at: parse_ts(row.get("created_at")),
            updated_at: parse_ts(row.get("updated_at")),
        })
    }
}

pub struct UserProfileRepo;

impl UserProfileRepo {
    #[instrument(skip(scope, profile), fields(user_id = %profile.user_id), err)]
    pub async fn upsert(scope: &mut RepoScope, profile: &UserProfile) -> RepoResult<()> {
        let body = serde_json::to_string(profile)?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, profile, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT (user_id) DO UPDATE SET
                profile = excluded.profile,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.user_id)
        .bind(&body)
        .bind(&now)
        .execute(scope.conn())
        .await?;
        Ok(())
    }

    /// `None` rather than an error: most callers treat the profile as an
    /// optional enrichment.
    #[instrument(skip(scope), err)]
    pub async fn get(scope: &mut RepoScope, user_id: &str) -> RepoResult<Option<UserProfile>> {
        let row = sqlx::query("SELECT profile FROM user_profiles WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(scope.conn())
            .await?;
        match row {
            Some(row) => {
                let body: String = row.get("profile");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }
}

pub struct ExecutionLogRepo;

impl ExecutionLogRepo {
    /// Append one entry. The table is append-only; there is no update path.
    #[instrument(skip(scope, entry), fields(trace_id = %entry.trace_id), err)]
    pub async fn append(scope: &mut RepoScope, entry: &ExecutionLogEntry) -> RepoResult<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        sqlx::query(
            r#"
            INSERT INTO execution_logs (trace_id, level, category, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&entry.trace_id)
        .bind(&entry.level)
        .bind(&entry.category)
        .bind(&payload)
        .bind(entry.created_at.to_rfc3339())
        .execute(scope.conn())
        .await?;
        Ok(())
    }

    /// Entries for one trace, newest first, optionally filtered by level.
    #[instrument(skip(scope), err)]
    pub async fn list_for_trace(
        scope: &mut RepoScope,
        trace_id: &str,
        level: Option<&str>,
        limit: u32,
    ) -> RepoResult<Vec<ExecutionLogEntry>> {
        let rows = match level {
            Some(level) => {
                sqlx::query(
                    r#"
                    SELECT * FROM execution_logs
                    WHERE trace_id = ?1 AND level = ?2
                    ORDER BY created_at DESC LIMIT ?3
                    "#,
                )
                .bind(trace_id)
                .bind(level)
                .bind(limit)
                .fetch_all(scope.conn())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM execution_logs
                    WHERE trace_id = ?1
                    ORDER BY created_at DESC LIMIT ?2
                    "#,
                )
                .bind(trace_id)
                .bind(limit)
                .fetch_all(scope.conn())
                .await?
            }
        };
        rows.iter()
            .map(|row| {
                let payload: String = row.get("payload");
                Ok(ExecutionLogEntry {
                    trace_id: row.get("trace_id"),
                    level: row.get("level"),
                    category: row.get("category"),
                    payload: serde_json::from_str(&payload)?,
                    created_at: parse_ts(row.get("created_at")),
                })
            })
            .collect()
    }
}
