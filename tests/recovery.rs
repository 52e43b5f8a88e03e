//! Recovery sweeper: stuck tasks with a checkpoint are re-enqueued under a
//! lease, tasks without one are marked unrecoverable, and held leases stop
//! duplicate resurrection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::Harness;
use roadweave::checkpoint::{Checkpoint, Checkpointer, LeaseStore};
use roadweave::config::EngineConfig;
use roadweave::model::Task;
use roadweave::queue::{JobPayload, QueueName, TaskQueue};
use roadweave::runtime::recovery::RecoverySweeper;
use roadweave::state::WorkflowState;
use roadweave::types::{TaskStatus, WorkflowStep};

/// Push a task's `updated_at` two days into the past, straight in SQL;
/// the repositories always stamp "now".
async fn make_stale(harness: &Harness, task_id: &str) {
    let pool = sqlx::SqlitePool::connect(&harness.config.database.url)
        .await
        .unwrap();
    sqlx::query(
        "UPDATE tasks SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-2 days') WHERE task_id = ?1",
    )
    .bind(task_id)
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;
}

fn sweeper(harness: &Harness, worker_id: &str) -> RecoverySweeper {
    RecoverySweeper::new(
        Arc::clone(&harness.repos),
        harness.checkpointer.clone(),
        harness.checkpointer.clone(),
        harness.queue.clone(),
        harness.config.recovery.clone(),
        harness.config.timeouts.workflow_budget,
        worker_id.to_string(),
    )
}

async fn seed_processing_task(harness: &Harness, task_id: &str) {
    let mut task = Task::new(
        task_id.to_string(),
        "user-1".to_string(),
        "roadmap_generation",
        json!({"goal": "x"}),
    );
    task.status = TaskStatus::Processing;
    harness.insert_task(&task).await;
}

#[tokio::test]
async fn stale_task_with_checkpoint_is_requeued() {
    let harness = Harness::new(EngineConfig::default()).await;
    seed_processing_task(&harness, "t1").await;
    harness
        .checkpointer
        .save(Checkpoint::capture(
            "t1",
            WorkflowStep::Curriculum,
            &WorkflowState::new("t1", "user-1", json!({"goal": "x"})),
        ))
        .await
        .unwrap();
    make_stale(&harness, "t1").await;

    let report = sweeper(&harness, "sweeper-a").sweep_once().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.marked_unrecoverable, 0);

    let job = harness
        .queue
        .poll(QueueName::Content)
        .await
        .unwrap()
        .expect("requeued job");
    assert_eq!(
        job.payload,
        JobPayload::RunWorkflow {
            task_id: "t1".to_string(),
        }
    );

    let task = harness.get_task("t1").await;
    assert_eq!(task.queue_job_id.as_deref(), Some(job.job_id.as_str()));
    // Still non-terminal: the re-enqueued run owns the outcome.
    assert_eq!(task.status, TaskStatus::Processing);
}

#[tokio::test]
async fn stale_task_without_checkpoint_is_unrecoverable() {
    let harness = Harness::new(EngineConfig::default()).await;
    seed_processing_task(&harness, "t1").await;
    make_stale(&harness, "t1").await;

    let report = sweeper(&harness, "sweeper-a").sweep_once().await.unwrap();
    assert_eq!(report.requeued, 0);
    assert_eq!(report.marked_unrecoverable, 1);

    let task = harness.get_task("t1").await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error.unwrap()["reason"],
        json!("unrecoverable")
    );
    assert!(harness.queue.poll(QueueName::Content).await.unwrap().is_none());
}

#[tokio::test]
async fn fresh_tasks_are_left_alone() {
    let harness = Harness::new(EngineConfig::default()).await;
    seed_processing_task(&harness, "t1").await;

    let report = sweeper(&harness, "sweeper-a").sweep_once().await.unwrap();
    assert_eq!(report, Default::default());
    assert_eq!(harness.get_task("t1").await.status, TaskStatus::Processing);
}

#[tokio::test]
async fn held_lease_blocks_duplicate_resurrection() {
    let harness = Harness::new(EngineConfig::default()).await;
    seed_processing_task(&harness, "t1").await;
    harness
        .checkpointer
        .save(Checkpoint::capture(
            "t1",
            WorkflowStep::Curriculum,
            &WorkflowState::new("t1", "user-1", json!({"goal": "x"})),
        ))
        .await
        .unwrap();
    make_stale(&harness, "t1").await;

    // Another worker already claimed this workflow.
    assert!(harness
        .checkpointer
        .try_acquire("t1", "other-worker", Duration::from_secs(300))
        .await
        .unwrap());

    let report = sweeper(&harness, "sweeper-a").sweep_once().await.unwrap();
    assert_eq!(report.requeued, 0);
    assert!(harness.queue.poll(QueueName::Content).await.unwrap().is_none());
}

#[tokio::test]
async fn disabled_recovery_sweeps_nothing() {
    let mut config = EngineConfig::default();
    config.recovery.enable = false;
    let harness = Harness::new(config).await;
    seed_processing_task(&harness, "t1").await;
    make_stale(&harness, "t1").await;

    let report = sweeper(&harness, "sweeper-a").sweep_once().await.unwrap();
    assert_eq!(report, Default::default());
}
