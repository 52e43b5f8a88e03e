//! Tutorial metadata repository.
//!
//! Version discipline: a save for a concept that already has tutorials
//! first clears every `is_latest` flag for that (roadmap_id, concept_id),
//! then inserts the new row with `content_version = max(prior) + 1` and
//! `is_latest = true`. A save whose `tutorial_id` already exists is a plain
//! in-place update and touches neither the version nor the flags.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use super::task::parse_ts;
use super::{RepoError, RepoResult, RepoScope};
use crate::model::TutorialMetadata;
use crate::types::ContentStatus;

pub struct TutorialRepo;

impl TutorialRepo {
    #[instrument(skip(scope, tutorial), fields(tutorial_id = %tutorial.tutorial_id), err)]
    pub async fn upsert(scope: &mut RepoScope, tutorial: &TutorialMetadata) -> RepoResult<()> {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM tutorials WHERE tutorial_id = ?1")
                .bind(&tutorial.tutorial_id)
                .fetch_optional(scope.conn())
                .await?;

        if exists.is_some() {
            sqlx::query(
                r#"
                UPDATE tutorials
                SET content_url = ?2, summary = ?3, content_status = ?4, updated_at = ?5
                WHERE tutorial_id = ?1
                "#,
            )
            .bind(&tutorial.tutorial_id)
            .bind(&tutorial.content_url)
            .bind(&tutorial.summary)
            .bind(tutorial.content_status.encode())
            .bind(Utc::now().to_rfc3339())
            .execute(scope.conn())
            .await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE tutorials SET is_latest = 0, updated_at = ?3
            WHERE roadmap_id = ?1 AND concept_id = ?2 AND is_latest = 1
            "#,
        )
        .bind(&tutorial.roadmap_id)
        .bind(&tutorial.concept_id)
        .bind(Utc::now().to_rfc3339())
        .execute(scope.conn())
        .await?;

        let next_version: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(content_version), 0) + 1
            FROM tutorials WHERE roadmap_id = ?1 AND concept_id = ?2
            "#,
        )
        .bind(&tutorial.roadmap_id)
        .bind(&tutorial.concept_id)
        .fetch_one(scope.conn())
        .await?;

        sqlx::query(
            r#"
            INSERT INTO tutorials (
                tutorial_id, concept_id, roadmap_id, content_version, is_latest,
                content_url, summary, content_status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&tutorial.tutorial_id)
        .bind(&tutorial.concept_id)
        .bind(&tutorial.roadmap_id)
        .bind(next_version)
        .bind(&tutorial.content_url)
        .bind(&tutorial.summary)
        .bind(tutorial.content_status.encode())
        .bind(tutorial.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(scope.conn())
        .await?;
        Ok(())
    }

    #[instrument(skip(scope), err)]
    pub async fn get(scope: &mut RepoScope, tutorial_id: &str) -> RepoResult<TutorialMetadata> {
        let row = sqlx::query("SELECT * FROM tutorials WHERE tutorial_id = ?1")
            .bind(tutorial_id)
            .fetch_optional(scope.conn())
            .await?
            .ok_or_else(|| RepoError::NotFound {
                entity: "tutorial",
                key: tutorial_id.to_string(),
            })?;
        Self::row_to_tutorial(&row)
    }

    /// The `is_latest` row for a concept, if one exists.
    #[instrument(skip(scope), err)]
    pub async fn latest_for_concept(
        scope: &mut RepoScope,
        roadmap_id: &str,
        concept_id: &str,
    ) -> RepoResult<Option<TutorialMetadata>> {
        let row = sqlx::query(
            "SELECT * FROM tutorials WHERE roadmap_id = ?1 AND concept_id = ?2 AND is_latest = 1",
        )
        .bind(roadmap_id)
        .bind(concept_id)
        .fetch_optional(scope.conn())
        .await?;
        row.as_ref().map(Self::row_to_tutorial).transpose()
    }

    /// All rows for a roadmap, version history included.
    #[instrument(skip(scope), err)]
    pub async fn list_for_roadmap(
        scope: &mut RepoScope,
        roadmap_id: &str,
    ) -> RepoResult<Vec<TutorialMetadata>> {
        let rows = sqlx::query(
            "SELECT * FROM tutorials WHERE roadmap_id = ?1 ORDER BY concept_id, content_version",
        )
        .bind(roadmap_id)
        .fetch_all(scope.conn())
        .await?;
        rows.iter().map(Self::row_to_tutorial).collect()
    }

    fn row_to_tutorial(row: &SqliteRow) -> RepoResult<TutorialMetadata> {
        let status_raw: String = row.get("content_status");
        let is_latest: i64 = row.get("is_latest");
        Ok(TutorialMetadata {
            tutorial_id: row.get("tutorial_id"),
            concept_id: row.get("concept_id"),
            roadmap_id: row.get("roadmap_id"),
            content_version: row.get("content_version"),
            is_latest: is_latest != 0,
            content_url: row.get("content_url"),
            summary: row.get("summary"),
            content_status: match status_raw.as_str() {
                "completed" => ContentStatus::Completed,
                "failed" => ContentStatus::Failed,
                _ => ContentStatus::Pending,
            },
            created_at: parse_ts(row.get("created_at")),
            updated_at: parse_ts(row.get("updated_at")),
        })
    }
}
