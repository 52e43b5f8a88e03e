//! End-to-end executor scenarios: the happy path through human review and
//! content fan-out, rejection, the editor loop, parse recovery, retries,
//! and terminal no-ops.

mod common;

use serde_json::json;

use common::{
    Harness, curriculum_body, intent_body, quiz_body, resources_body, scripted_agents,
    tutorial_body, validation_fail_body, validation_pass_body,
};
use roadweave::agents::{AgentError, AgentKind, ChatMessage, ScriptedChatModel};
use roadweave::checkpoint::Checkpointer;
use roadweave::config::EngineConfig;
use roadweave::model::Task;
use roadweave::queue::{QueueName, TaskQueue};
use roadweave::repo::{QuizRepo, ResourceRepo, RoadmapRepo, TutorialRepo};
use roadweave::runtime::CancelToken;
use roadweave::runtime::content::ContentJobSpec;
use roadweave::runtime::executor::RunOutcome;
use roadweave::types::{ArtifactKind, ContentStatus, ReviewDecision, TaskStatus, WorkflowStep};

fn new_task(task_id: &str) -> Task {
    Task::new(
        task_id.to_string(),
        "user-1".to_string(),
        "roadmap_generation",
        json!({"goal": "Learn Python"}),
    )
}

#[tokio::test]
async fn happy_path_single_concept() {
    let harness = Harness::new(EngineConfig::default()).await;
    harness.insert_task(&new_task("t1")).await;

    let executor = harness.executor(scripted_agents(vec![
        (
            AgentKind::IntentAnalyzer,
            ScriptedChatModel::new(vec![ChatMessage::assistant(intent_body())]),
        ),
        (
            AgentKind::CurriculumArchitect,
            ScriptedChatModel::new(vec![ChatMessage::assistant(curriculum_body(1))]),
        ),
        (
            AgentKind::StructureValidator,
            ScriptedChatModel::new(vec![ChatMessage::assistant(validation_pass_body())]),
        ),
    ]));

    let outcome = executor.run("t1", CancelToken::never()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Suspended(WorkflowStep::HumanReview));
    assert_eq!(
        harness.get_task("t1").await.status,
        TaskStatus::HumanReviewPending
    );

    let outcome = executor
        .resume("t1", ReviewDecision::Approve, CancelToken::never())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::HandedOff);

    // The content runner parked a fan-out job on the content queue.
    let job = harness
        .queue
        .poll(QueueName::Content)
        .await
        .unwrap()
        .expect("content job enqueued");
    let spec = ContentJobSpec::from_payload(&job.payload).expect("content payload");
    assert_eq!(spec.task_id, "t1");
    assert_eq!(spec.kinds.len(), 3);

    let content = harness.content_engine(scripted_agents(vec![
        (
            AgentKind::TutorialGenerator,
            ScriptedChatModel::new(vec![ChatMessage::assistant(tutorial_body())]),
        ),
        (
            AgentKind::ResourceRecommender,
            ScriptedChatModel::new(vec![ChatMessage::assistant(resources_body())]),
        ),
        (
            AgentKind::QuizGenerator,
            ScriptedChatModel::new(vec![ChatMessage::assistant(quiz_body())]),
        ),
    ]));
    let report = content.run(&spec, &CancelToken::never()).await.unwrap();
    assert_eq!(report.status, TaskStatus::Completed);
    assert!(report.failed_concepts.is_empty());

    let task = harness.get_task("t1").await;
    assert_eq!(task.status, TaskStatus::Completed);
    let roadmap_id = task.roadmap_id.expect("roadmap assigned");

    // Detail rows and the framework projection agree (dual-store
    // convergence).
    let mut scope = harness.repos.begin().await.unwrap();
    let tutorials = TutorialRepo::list_for_roadmap(&mut scope, &roadmap_id).await.unwrap();
    let resources = ResourceRepo::list_for_roadmap(&mut scope, &roadmap_id).await.unwrap();
    let quizzes = QuizRepo::list_for_roadmap(&mut scope, &roadmap_id).await.unwrap();
    let roadmap = RoadmapRepo::get(&mut scope, &roadmap_id).await.unwrap();
    scope.commit().await.unwrap();

    assert_eq!(tutorials.len(), 1);
    assert!(tutorials[0].is_latest);
    assert_eq!(tutorials[0].content_version, 1);
    assert_eq!(resources.len(), 1);
    assert_eq!(quizzes.len(), 1);

    let concept = roadmap.framework.concept("c1").unwrap();
    for kind in ArtifactKind::ALL {
        assert_eq!(concept.artifact_status(kind), ContentStatus::Completed);
        assert!(concept.artifact_id(kind).is_some());
    }

    // Driving a terminal workflow again is a no-op (and calls no agents:
    // every script above is already exhausted).
    let replay = executor.run("t1", CancelToken::never()).await.unwrap();
    assert_eq!(replay, RunOutcome::Completed(TaskStatus::Completed));
}

#[tokio::test]
async fn human_rejection_is_terminal_and_skips_content() {
    let harness = Harness::new(EngineConfig::default()).await;
    harness.insert_task(&new_task("t1")).await;

    let executor = harness.executor(scripted_agents(vec![
        (
            AgentKind::IntentAnalyzer,
            ScriptedChatModel::new(vec![ChatMessage::assistant(intent_body())]),
        ),
        (
            AgentKind::CurriculumArchitect,
            ScriptedChatModel::new(vec![ChatMessage::assistant(curriculum_body(2))]),
        ),
        (
            AgentKind::StructureValidator,
            ScriptedChatModel::new(vec![ChatMessage::assistant(validation_pass_body())]),
        ),
    ]));

    let outcome = executor.run("t1", CancelToken::never()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Suspended(WorkflowStep::HumanReview));

    let outcome = executor
        .resume("t1", ReviewDecision::Reject, CancelToken::never())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(TaskStatus::Rejected));
    assert_eq!(harness.get_task("t1").await.status, TaskStatus::Rejected);

    // No content job was ever enqueued.
    assert!(harness.queue.poll(QueueName::Content).await.unwrap().is_none());

    // A later decision cannot reopen the task.
    let replay = executor
        .resume("t1", ReviewDecision::Approve, CancelToken::never())
        .await
        .unwrap();
    assert_eq!(replay, RunOutcome::Completed(TaskStatus::Rejected));
}

#[tokio::test]
async fn editor_revises_until_validation_passes() {
    let mut config = EngineConfig::default();
    config.workflow.skip_human_review = true;
    config.workflow.skip_content_generation = true;
    let harness = Harness::new(config).await;
    harness.insert_task(&new_task("t1")).await;

    let executor = harness.executor(scripted_agents(vec![
        (
            AgentKind::IntentAnalyzer,
            ScriptedChatModel::new(vec![ChatMessage::assistant(intent_body())]),
        ),
        (
            AgentKind::CurriculumArchitect,
            ScriptedChatModel::new(vec![ChatMessage::assistant(curriculum_body(1))]),
        ),
        (
            AgentKind::StructureValidator,
            ScriptedChatModel::new(vec![
                ChatMessage::assistant(validation_fail_body()),
                ChatMessage::assistant(validation_pass_body()),
            ]),
        ),
        (
            AgentKind::RoadmapEditor,
            ScriptedChatModel::new(vec![ChatMessage::assistant(curriculum_body(2))]),
        ),
    ]));

    let outcome = executor.run("t1", CancelToken::never()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(TaskStatus::Completed));

    let checkpoint = harness
        .checkpointer
        .load_latest("t1")
        .await
        .unwrap()
        .expect("checkpointed");
    assert_eq!(checkpoint.state.edit_cycles, 1);
    let report = checkpoint.state.validation.expect("revalidated");
    assert!(report.issues.is_empty());
    // The revised framework replaced the original.
    assert_eq!(checkpoint.state.framework.unwrap().concepts().count(), 2);
}

#[tokio::test]
async fn curriculum_parse_recovery_normalizes_framework() {
    let mut config = EngineConfig::default();
    config.workflow.skip_validation = true;
    config.workflow.skip_human_review = true;
    config.workflow.skip_content_generation = true;
    let harness = Harness::new(config).await;
    harness.insert_task(&new_task("t1")).await;

    // Fenced, wrapped under "output", and missing order/total fields.
    let body = "```json\n{\"output\":{\"stages\":[{\"title\":\"S\",\"modules\":[{\"title\":\"M\",\"concepts\":[{\"concept_id\":\"c1\",\"title\":\"C\",\"estimated_hours\":10.0}]}]}]}}\n```";
    let executor = harness.executor(scripted_agents(vec![
        (
            AgentKind::IntentAnalyzer,
            ScriptedChatModel::new(vec![ChatMessage::assistant(intent_body())]),
        ),
        (
            AgentKind::CurriculumArchitect,
            ScriptedChatModel::new(vec![ChatMessage::assistant(body)]),
        ),
    ]));

    let outcome = executor.run("t1", CancelToken::never()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(TaskStatus::Completed));

    let roadmap_id = harness.get_task("t1").await.roadmap_id.unwrap();
    let mut scope = harness.repos.begin().await.unwrap();
    let roadmap = RoadmapRepo::get(&mut scope, &roadmap_id).await.unwrap();
    scope.commit().await.unwrap();

    assert_eq!(roadmap.framework.stages[0].order, 1);
    assert_eq!(roadmap.framework.total_estimated_hours, 10.0);
    // intent says 5 hours/week → ceil(10 / 5) = 2 weeks.
    assert_eq!(roadmap.framework.recommended_completion_weeks, 2);
}

#[tokio::test]
async fn transient_provider_errors_are_retried() {
    let mut config = EngineConfig::default();
    config.workflow.skip_validation = true;
    config.workflow.skip_human_review = true;
    config.workflow.skip_content_generation = true;
    let harness = Harness::new(config).await;
    harness.insert_task(&new_task("t1")).await;

    let flaky = ScriptedChatModel::with_outcomes(vec![
        Err(AgentError::Provider {
            provider: "http".into(),
            message: "503".into(),
        }),
        Ok(ChatMessage::assistant(intent_body())),
    ]);
    let executor = harness.executor(scripted_agents(vec![
        (AgentKind::IntentAnalyzer, flaky),
        (
            AgentKind::CurriculumArchitect,
            ScriptedChatModel::new(vec![ChatMessage::assistant(curriculum_body(1))]),
        ),
    ]));

    let outcome = executor.run("t1", CancelToken::never()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(TaskStatus::Completed));
}

#[tokio::test]
async fn exhausted_transient_retries_fail_the_task() {
    let mut config = EngineConfig::default();
    config.workflow.skip_validation = true;
    config.workflow.skip_human_review = true;
    config.workflow.skip_content_generation = true;
    let harness = Harness::new(config).await;
    harness.insert_task(&new_task("t1")).await;

    // The scripted model fails every call once its (empty) script runs dry.
    let executor = harness.executor(scripted_agents(vec![(
        AgentKind::IntentAnalyzer,
        ScriptedChatModel::new(vec![]),
    )]));

    let outcome = executor.run("t1", CancelToken::never()).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed(_)));
    let task = harness.get_task("t1").await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.is_some());
}
