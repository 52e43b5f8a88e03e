//! Roadmap metadata repository.
//!
//! Holds the structural half of the dual store. Upserting an existing
//! roadmap id replaces the framework document wholesale and bumps
//! `updated_at`; ownership columns never change after insert.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use super::task::parse_ts;
use super::{RepoError, RepoResult, RepoScope};
use crate::model::{Framework, RoadmapMetadata};

pub struct RoadmapRepo;

impl RoadmapRepo {
    #[instrument(skip(scope, roadmap), fields(roadmap_id = %roadmap.roadmap_id), err)]
    pub async fn upsert(scope: &mut RepoScope, roadmap: &RoadmapMetadata) -> RepoResult<()> {
        let framework = serde_json::to_string(&roadmap.framework)?;
        sqlx::query(
            r#"
            INSERT INTO roadmaps (roadmap_id, task_id, user_id, framework, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (roadmap_id) DO UPDATE SET
                framework = excluded.framework,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&roadmap.roadmap_id)
        .bind(&roadmap.task_id)
        .bind(&roadmap.user_id)
        .bind(&framework)
        .bind(roadmap.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(scope.conn())
        .await?;
        Ok(())
    }

    #[instrument(skip(scope), err)]
    pub async fn get(scope: &mut RepoScope, roadmap_id: &str) -> RepoResult<RoadmapMetadata> {
        let row = sqlx::query("SELECT * FROM roadmaps WHERE roadmap_id = ?1")
            .bind(roadmap_id)
            .fetch_optional(scope.conn())
            .await?
            .ok_or_else(|| RepoError::NotFound {
                entity: "roadmap",
                key: roadmap_id.to_string(),
            })?;
        Self::row_to_roadmap(&row)
    }

    /// Replace only the framework document of an existing roadmap.
    #[instrument(skip(scope, framework), err)]
    pub async fn update_framework(
        scope: &mut RepoScope,
        roadmap_id: &str,
        framework: &Framework,
    ) -> RepoResult<()> {
        let framework = serde_json::to_string(framework)?;
        sqlx::query("UPDATE roadmaps SET framework = ?2, updated_at = ?3 WHERE roadmap_id = ?1")
            .bind(roadmap_id)
            .bind(&framework)
            .bind(Utc::now().to_rfc3339())
            .execute(scope.conn())
            .await?;
        Ok(())
    }

    /// Cascade-delete a roadmap and its content detail rows.
    #[instrument(skip(scope), err)]
    pub async fn delete(scope: &mut RepoScope, roadmap_id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM roadmaps WHERE roadmap_id = ?1")
            .bind(roadmap_id)
            .execute(scope.conn())
            .await?;
        Ok(())
    }

    fn row_to_roadmap(row: &SqliteRow) -> RepoResult<RoadmapMetadata> {
        let framework: String = row.get("framework");
        Ok(RoadmapMetadata {
            roadmap_id: row.get("roadmap_id"),
            task_id: row.get("task_id"),
            user_id: row.get("user_id"),
            framework: serde_json::from_str(&framework)?,
            created_at: parse_ts(row.get("created_at")),
            updated_at: parse_ts(row.get("updated_at")),
        })
    }
}
