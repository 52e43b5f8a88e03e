//! Resource-recommendation and quiz repositories.
//!
//! Both tables are keyed by (concept_id, roadmap_id). An upsert whose
//! primary key matches the existing row updates in place; a different
//! primary key for the same concept deletes the prior rows first, so each
//! concept keeps exactly one row per table.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use super::task::parse_ts;
use super::{RepoError, RepoResult, RepoScope};
use crate::model::{QuizMetadata, ResourceRecommendationMetadata};

pub struct ResourceRepo;

impl ResourceRepo {
    #[instrument(skip(scope, rec), fields(concept_id = %rec.concept_id), err)]
    pub async fn upsert(
        scope: &mut RepoScope,
        rec: &ResourceRecommendationMetadata,
    ) -> RepoResult<()> {
        let resources = serde_json::to_string(&rec.resources)?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM resource_recommendations WHERE concept_id = ?1 AND roadmap_id = ?2",
        )
        .bind(&rec.concept_id)
        .bind(&rec.roadmap_id)
        .fetch_optional(scope.conn())
        .await?;

        match existing {
            Some(id) if id == rec.id => {
                sqlx::query(
                    "UPDATE resource_recommendations SET resources = ?2, updated_at = ?3 WHERE id = ?1",
                )
                .bind(&rec.id)
                .bind(&resources)
                .bind(Utc::now().to_rfc3339())
                .execute(scope.conn())
                .await?;
            }
            _ => {
                sqlx::query(
                    "DELETE FROM resource_recommendations WHERE concept_id = ?1 AND roadmap_id = ?2",
                )
                .bind(&rec.concept_id)
                .bind(&rec.roadmap_id)
                .execute(scope.conn())
                .await?;
                sqlx::query(
                    r#"
                    INSERT INTO resource_recommendations
                        (id, concept_id, roadmap_id, resources, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .bind(&rec.id)
                .bind(&rec.concept_id)
                .bind(&rec.roadmap_id)
                .bind(&resources)
                .bind(rec.created_at.to_rfc3339())
                .bind(Utc::now().to_rfc3339())
                .execute(scope.conn())
                .await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(scope), err)]
    pub async fn get_for_concept(
        scope: &mut RepoScope,
        roadmap_id: &str,
        concept_id: &str,
    ) -> RepoResult<ResourceRecommendationMetadata> {
        let row = sqlx::query(
            "SELECT * FROM resource_recommendations WHERE roadmap_id = ?1 AND concept_id = ?2",
        )
        .bind(roadmap_id)
        .bind(concept_id)
        .fetch_optional(scope.conn())
        .await?
        .ok_or_else(|| RepoError::NotFound {
            entity: "resource recommendation",
            key: format!("{roadmap_id}/{concept_id}"),
        })?;
        Self::row_to_rec(&row)
    }

    #[instrument(skip(scope), err)]
    pub async fn list_for_roadmap(
        scope: &mut RepoScope,
        roadmap_id: &str,
    ) -> RepoResult<Vec<ResourceRecommendationMetadata>> {
        let rows = sqlx::query(
            "SELECT * FROM resource_recommendations WHERE roadmap_id = ?1 ORDER BY concept_id",
        )
        .bind(roadmap_id)
        .fetch_all(scope.conn())
        .await?;
        rows.iter().map(Self::row_to_rec).collect()
    }

    fn row_to_rec(row: &SqliteRow) -> RepoResult<ResourceRecommendationMetadata> {
        let resources: String = row.get("resources");
        Ok(ResourceRecommendationMetadata {
            id: row.get("id"),
            concept_id: row.get("concept_id"),
            roadmap_id: row.get("roadmap_id"),
            resources: serde_json::from_str(&resources)?,
            created_at: parse_ts(row.get("created_at")),
            updated_at: parse_ts(row.get("updated_at")),
        })
    }
}

pub struct QuizRepo;

impl QuizRepo {
    #[instrument(skip(scope, quiz), fields(concept_id = %quiz.concept_id), err)]
    pub async fn upsert(scope: &mut RepoScope, quiz: &QuizMetadata) -> RepoResult<()> {
        let questions = serde_json::to_string(&quiz.questions)?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT quiz_id FROM quizzes WHERE concept_id = ?1 AND roadmap_id = ?2",
        )
        .bind(&quiz.concept_id)
        .bind(&quiz.roadmap_id)
        .fetch_optional(scope.conn())
        .await?;

        match existing {
            Some(id) if id == quiz.quiz_id => {
                sqlx::query("UPDATE quizzes SET questions = ?2, updated_at = ?3 WHERE quiz_id = ?1")
                    .bind(&quiz.quiz_id)
                    .bind(&questions)
                    .bind(Utc::now().to_rfc3339())
                    .execute(scope.conn())
                    .await?;
            }
            _ => {
                sqlx::query("DELETE FROM quizzes WHERE concept_id = ?1 AND roadmap_id = ?2")
                    .bind(&quiz.concept_id)
                    .bind(&quiz.roadmap_id)
                    .execute(scope.conn())
                    .await?;
                sqlx::query(
                    r#"
                    INSERT INTO quizzes
                        (quiz_id, concept_id, roadmap_id, questions, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .bind(&quiz.quiz_id)
                .bind(&quiz.concept_id)
                .bind(&quiz.roadmap_id)
                .bind(&questions)
                .bind(quiz.created_at.to_rfc3339())
                .bind(Utc::now().to_rfc3339())
                .execute(scope.conn())
                .await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(scope), err)]
    pub async fn get_for_concept(
        scope: &mut RepoScope,
        roadmap_id: &str,
        concept_id: &str,
    ) -> RepoResult<QuizMetadata> {
        let row = sqlx::query("SELECT * FROM quizzes WHERE roadmap_id = ?1 AND concept_id = ?2")
            .bind(roadmap_id)
            .bind(concept_id)
            .fetch_optional(scope.conn())
            .await?
            .ok_or_else(|| RepoError::NotFound {
                entity: "quiz",
                key: format!("{roadmap_id}/{concept_id}"),
            })?;
        Self::row_to_quiz(&row)
    }

    #[instrument(skip(scope), err)]
    pub async fn list_for_roadmap(
        scope: &mut RepoScope,
        roadmap_id: &str,
    ) -> RepoResult<Vec<QuizMetadata>> {
        let rows =
            sqlx::query("SELECT * FROM quizzes WHERE roadmap_id = ?1 ORDER BY concept_id")
                .bind(roadmap_id)
                .fetch_all(scope.conn())
                .await?;
        rows.iter().map(Self::row_to_quiz).collect()
    }

    fn row_to_quiz(row: &SqliteRow) -> RepoResult<QuizMetadata> {
        let questions: String = row.get("questions");
        Ok(QuizMetadata {
            quiz_id: row.get("quiz_id"),
            concept_id: row.get("concept_id"),
            roadmap_id: row.get("roadmap_id"),
            questions: serde_json::from_str(&questions)?,
            created_at: parse_ts(row.get("created_at")),
            updated_at: parse_ts(row.get("updated_at")),
        })
    }
}
