//! Content fan-out: partial failure, resume without duplicates, and the
//! per-kind concurrency bound.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde_json::json;

use common::{
    CountingModel, Harness, quiz_body, resources_body, scripted_agents, tutorial_body,
};
use roadweave::agents::{
    AgentError, AgentFactory, AgentKind, Agents, ChatMessage, ChatModel, ScriptedChatModel,
};
use roadweave::config::EngineConfig;
use roadweave::model::{
    Concept, Framework, Module, RoadmapMetadata, Stage, Task, TutorialMetadata,
};
use roadweave::repo::{QuizRepo, ResourceRepo, RoadmapRepo, TutorialRepo};
use roadweave::runtime::CancelToken;
use roadweave::runtime::content::ContentJobSpec;
use roadweave::types::{ArtifactKind, ContentStatus, TaskStatus, WorkflowStep};

fn framework_with(concepts: Vec<Concept>) -> Framework {
    Framework {
        title: "Roadmap".into(),
        stages: vec![Stage {
            title: "Stage".into(),
            order: 1,
            modules: vec![Module {
                title: "Module".into(),
                concepts,
            }],
        }],
        total_estimated_hours: 6.0,
        recommended_completion_weeks: 2,
    }
}

fn concept(id: &str) -> Concept {
    Concept {
        concept_id: id.to_string(),
        title: format!("Concept {id}"),
        estimated_hours: 2.0,
        ..Default::default()
    }
}

async fn seed(harness: &Harness, task_id: &str, roadmap_id: &str, framework: Framework) {
    let mut task = Task::new(
        task_id.to_string(),
        "user-1".to_string(),
        "roadmap_generation",
        json!({"goal": "x"}),
    );
    task.status = TaskStatus::Processing;
    task.current_step = Some(WorkflowStep::ContentGeneration);
    task.roadmap_id = Some(roadmap_id.to_string());
    harness.insert_task(&task).await;

    let now = Utc::now();
    let mut scope = harness.repos.begin().await.unwrap();
    RoadmapRepo::upsert(
        &mut scope,
        &RoadmapMetadata {
            roadmap_id: roadmap_id.to_string(),
            task_id: task_id.to_string(),
            user_id: "user-1".to_string(),
            framework,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .unwrap();
    scope.commit().await.unwrap();
}

fn full_job(task_id: &str, roadmap_id: &str) -> ContentJobSpec {
    ContentJobSpec {
        task_id: task_id.to_string(),
        roadmap_id: roadmap_id.to_string(),
        kinds: ArtifactKind::ALL.to_vec(),
        concept_ids: None,
    }
}

#[tokio::test]
async fn partial_failure_reports_failed_concepts() {
    let mut config = EngineConfig::default();
    // Serialize resource generation so the scripted failure lands on c2.
    config.semaphore_caps.insert(ArtifactKind::Resources, 1);
    let harness = Harness::new(config).await;
    seed(
        &harness,
        "t1",
        "r1",
        framework_with(vec![concept("c1"), concept("c2"), concept("c3")]),
    )
    .await;

    let content = harness.content_engine(scripted_agents(vec![
        (
            AgentKind::TutorialGenerator,
            ScriptedChatModel::repeating(tutorial_body()),
        ),
        (
            AgentKind::ResourceRecommender,
            ScriptedChatModel::with_outcomes(vec![
                Ok(ChatMessage::assistant(resources_body())),
                Err(AgentError::InvalidDocument {
                    what: "resource list",
                    message: "model refused".into(),
                }),
                Ok(ChatMessage::assistant(resources_body())),
            ]),
        ),
        (
            AgentKind::QuizGenerator,
            ScriptedChatModel::repeating(quiz_body()),
        ),
    ]));

    let report = content
        .run(&full_job("t1", "r1"), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(report.status, TaskStatus::PartialFailure);
    assert_eq!(
        report.failed_concepts.get(&ArtifactKind::Resources),
        Some(&vec!["c2".to_string()])
    );

    let task = harness.get_task("t1").await;
    assert_eq!(task.status, TaskStatus::PartialFailure);
    let error = task.error.expect("failure payload recorded");
    assert!(error["failed_concepts"]["resources"][0] == json!("c2"));

    let mut scope = harness.repos.begin().await.unwrap();
    let tutorials = TutorialRepo::list_for_roadmap(&mut scope, "r1").await.unwrap();
    let resources = ResourceRepo::list_for_roadmap(&mut scope, "r1").await.unwrap();
    let quizzes = QuizRepo::list_for_roadmap(&mut scope, "r1").await.unwrap();
    let roadmap = RoadmapRepo::get(&mut scope, "r1").await.unwrap();
    scope.commit().await.unwrap();

    assert_eq!(tutorials.len(), 3);
    assert_eq!(resources.len(), 2);
    assert_eq!(quizzes.len(), 3);

    let failed = roadmap.framework.concept("c2").unwrap();
    assert_eq!(
        failed.artifact_status(ArtifactKind::Resources),
        ContentStatus::Failed
    );
    assert!(failed.resources_id.is_none());
    for id in ["c1", "c3"] {
        let ok = roadmap.framework.concept(id).unwrap();
        assert_eq!(
            ok.artifact_status(ArtifactKind::Resources),
            ContentStatus::Completed
        );
    }
}

#[tokio::test]
async fn resume_skips_already_persisted_tutorials() {
    let harness = Harness::new(EngineConfig::default()).await;

    // c1 and c2 already have tutorials (a crash happened mid-fan-out).
    let mut done_one = concept("c1");
    let mut done_two = concept("c2");
    for (seeded, id) in [(&mut done_one, "tut-1"), (&mut done_two, "tut-2")] {
        seeded.content_status = ContentStatus::Completed;
        seeded.tutorial_id = Some(id.to_string());
    }
    seed(
        &harness,
        "t1",
        "r1",
        framework_with(vec![done_one, done_two, concept("c3"), concept("c4")]),
    )
    .await;
    {
        let mut scope = harness.repos.begin().await.unwrap();
        for concept_id in ["c1", "c2"] {
            TutorialRepo::upsert(
                &mut scope,
                &TutorialMetadata::draft(concept_id, "r1", None, Some("existing".into())),
            )
            .await
            .unwrap();
        }
        scope.commit().await.unwrap();
    }

    // Exactly two scripted responses: the engine may only generate c3, c4.
    let content = harness.content_engine(scripted_agents(vec![(
        AgentKind::TutorialGenerator,
        ScriptedChatModel::new(vec![
            ChatMessage::assistant(tutorial_body()),
            ChatMessage::assistant(tutorial_body()),
        ]),
    )]));
    let job = ContentJobSpec {
        kinds: vec![ArtifactKind::Tutorial],
        ..full_job("t1", "r1")
    };
    let report = content.run(&job, &CancelToken::never()).await.unwrap();

    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(harness.get_task("t1").await.status, TaskStatus::Completed);

    let mut scope = harness.repos.begin().await.unwrap();
    let tutorials = TutorialRepo::list_for_roadmap(&mut scope, "r1").await.unwrap();
    let roadmap = RoadmapRepo::get(&mut scope, "r1").await.unwrap();
    scope.commit().await.unwrap();

    // One row per concept, no duplicates, all first versions.
    assert_eq!(tutorials.len(), 4);
    for concept_id in ["c1", "c2", "c3", "c4"] {
        let rows: Vec<_> = tutorials
            .iter()
            .filter(|t| t.concept_id == concept_id)
            .collect();
        assert_eq!(rows.len(), 1, "one tutorial for {concept_id}");
        assert!(rows[0].is_latest);
        assert_eq!(rows[0].content_version, 1);
        assert_eq!(
            roadmap
                .framework
                .concept(concept_id)
                .unwrap()
                .artifact_status(ArtifactKind::Tutorial),
            ContentStatus::Completed
        );
    }
}

#[tokio::test]
async fn quiz_generation_respects_the_semaphore_cap() {
    let mut config = EngineConfig::default();
    config.semaphore_caps.insert(ArtifactKind::Quiz, 2);
    let harness = Harness::new(config).await;

    let concepts: Vec<Concept> = (1..=8).map(|i| concept(&format!("c{i}"))).collect();
    seed(&harness, "t1", "r1", framework_with(concepts)).await;

    let counting = CountingModel::new(quiz_body());
    let mut models: FxHashMap<AgentKind, Arc<dyn ChatModel>> = FxHashMap::default();
    models.insert(AgentKind::QuizGenerator, counting.clone());
    let content = harness.content_engine(Agents::new(AgentFactory::from_models(models)));

    let job = ContentJobSpec {
        kinds: vec![ArtifactKind::Quiz],
        ..full_job("t1", "r1")
    };
    let report = content.run(&job, &CancelToken::never()).await.unwrap();

    assert_eq!(report.status, TaskStatus::Completed);
    let max = counting.max_active.load(Ordering::SeqCst);
    assert!(max <= 2, "observed {max} concurrent quiz calls, cap is 2");

    let mut scope = harness.repos.begin().await.unwrap();
    let quizzes = QuizRepo::list_for_roadmap(&mut scope, "r1").await.unwrap();
    scope.commit().await.unwrap();
    assert_eq!(quizzes.len(), 8);
}
