//! Durable checkpoint store: append-only log, latest-wins resume reads,
//! forward-compatible snapshots, and advisory leases.

use std::time::Duration;

use roadweave::checkpoint::{Checkpoint, Checkpointer, LeaseStore, SqliteCheckpointStore};
use roadweave::state::{StatePatch, WorkflowState};
use roadweave::types::WorkflowStep;

async fn store(dir: &tempfile::TempDir) -> SqliteCheckpointStore {
    let url = format!("sqlite://{}/checkpoints.db", dir.path().display());
    SqliteCheckpointStore::connect(&url, 2).await.unwrap()
}

#[tokio::test]
async fn save_and_resume_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;

    let mut state = WorkflowState::new("w1", "u1", serde_json::json!({"goal": "x"}));
    store
        .save(Checkpoint::capture("w1", WorkflowStep::Intent, &state))
        .await
        .unwrap();

    state.apply(StatePatch::new().with_roadmap_id("r1"));
    store
        .save(Checkpoint::capture("w1", WorkflowStep::Curriculum, &state))
        .await
        .unwrap();

    let latest = store.load_latest("w1").await.unwrap().unwrap();
    assert_eq!(latest.step, WorkflowStep::Curriculum);
    assert_eq!(latest.state.roadmap_id.as_deref(), Some("r1"));
    assert_eq!(latest.state.user_request, serde_json::json!({"goal": "x"}));

    let log = store.list("w1").await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].step, WorkflowStep::Intent);

    assert!(store.load_latest("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn resaving_the_same_step_appends() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let state = WorkflowState::new("w1", "u1", serde_json::Value::Null);

    // At-least-once delivery can replay a node; both saves must land.
    for _ in 0..2 {
        store
            .save(Checkpoint::capture("w1", WorkflowStep::Intent, &state))
            .await
            .unwrap();
    }
    assert_eq!(store.list("w1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn snapshots_tolerate_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/checkpoints.db", dir.path().display());
    let store = SqliteCheckpointStore::connect(&url, 2).await.unwrap();

    let state = WorkflowState::new("w1", "u1", serde_json::Value::Null);
    store
        .save(Checkpoint::capture("w1", WorkflowStep::Intent, &state))
        .await
        .unwrap();

    // A future build writes an extra field into the snapshot column.
    let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
    sqlx::query(
        r#"
        UPDATE workflow_checkpoints
        SET snapshot = json_set(snapshot, '$.future_field', 'surprise')
        WHERE workflow_id = 'w1'
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let restored = store.load_latest("w1").await.unwrap().unwrap();
    assert_eq!(restored.state.task_id, "w1");
}

#[tokio::test]
async fn leases_block_and_reclaim() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let ttl = Duration::from_secs(300);

    assert!(store.try_acquire("w1", "worker-a", ttl).await.unwrap());
    assert!(!store.try_acquire("w1", "worker-b", ttl).await.unwrap());
    // Reentrant for the holder.
    assert!(store.try_acquire("w1", "worker-a", ttl).await.unwrap());

    store.release("w1", "worker-a").await.unwrap();
    assert!(store.try_acquire("w1", "worker-b", ttl).await.unwrap());

    // An expired lease is reclaimable by anyone.
    assert!(store
        .try_acquire("w2", "worker-a", Duration::from_secs(0))
        .await
        .unwrap());
    assert!(store.try_acquire("w2", "worker-b", ttl).await.unwrap());
}
