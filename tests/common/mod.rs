//! Shared fixtures for the integration tests: a tempdir-backed engine
//! harness, scripted chat models per agent kind, and canned agent bodies.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::json;
use tempfile::TempDir;

use roadweave::agents::{
    AgentError, AgentFactory, AgentKind, Agents, ChatMessage, ChatModel, ChatRequest,
    ChatResponse, ScriptedChatModel,
};
use roadweave::checkpoint::InMemoryCheckpointer;
use roadweave::config::EngineConfig;
use roadweave::events::NotificationBus;
use roadweave::model::Task;
use roadweave::queue::InProcessQueue;
use roadweave::repo::{RepoFactory, TaskRepo};
use roadweave::runtime::StateManager;
use roadweave::runtime::content::{ContentEngine, NoopObjectStore};
use roadweave::runtime::executor::WorkflowExecutor;

/// Everything a test needs to drive workflows against real SQLite files.
pub struct Harness {
    _dir: TempDir,
    pub repos: Arc<RepoFactory>,
    pub checkpointer: Arc<InMemoryCheckpointer>,
    pub queue: Arc<InProcessQueue>,
    pub bus: Arc<NotificationBus>,
    pub state_manager: Arc<StateManager>,
    pub config: Arc<EngineConfig>,
}

impl Harness {
    pub async fn new(mut config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        config.database.url = format!("sqlite://{}/business.db", dir.path().display());
        config.database.max_connections = 5;
        config.database.max_overflow = 0;
        let repos = Arc::new(
            RepoFactory::connect(&config.database)
                .await
                .expect("business store"),
        );
        Self {
            _dir: dir,
            repos,
            checkpointer: Arc::new(InMemoryCheckpointer::new()),
            queue: Arc::new(InProcessQueue::new()),
            bus: Arc::new(NotificationBus::new()),
            state_manager: Arc::new(StateManager::new()),
            config: Arc::new(config),
        }
    }

    pub fn executor(&self, agents: Agents) -> WorkflowExecutor {
        WorkflowExecutor::new(
            Arc::clone(&self.repos),
            Arc::new(agents),
            self.queue.clone(),
            Arc::clone(&self.bus),
            self.checkpointer.clone(),
            Arc::clone(&self.state_manager),
            Arc::clone(&self.config),
        )
    }

    pub fn content_engine(&self, agents: Agents) -> ContentEngine {
        ContentEngine::new(
            Arc::clone(&self.repos),
            Arc::new(agents),
            Arc::clone(&self.bus),
            self.checkpointer.clone(),
            Arc::new(NoopObjectStore),
            Arc::clone(&self.config),
        )
    }

    pub async fn insert_task(&self, task: &Task) {
        let mut scope = self.repos.begin().await.expect("scope");
        TaskRepo::upsert(&mut scope, task).await.expect("task upsert");
        scope.commit().await.expect("commit");
    }

    pub async fn get_task(&self, task_id: &str) -> Task {
        let mut scope = self.repos.begin().await.expect("scope");
        let task = TaskRepo::get(&mut scope, task_id).await.expect("task get");
        scope.commit().await.expect("commit");
        task
    }
}

/// Build an `Agents` facade from per-kind scripted models.
pub fn scripted_agents(models: Vec<(AgentKind, ScriptedChatModel)>) -> Agents {
    let mut map: FxHashMap<AgentKind, Arc<dyn ChatModel>> = FxHashMap::default();
    for (kind, model) in models {
        map.insert(kind, Arc::new(model));
    }
    Agents::new(AgentFactory::from_models(map))
}

pub fn intent_body() -> String {
    json!({
        "goal": "Learn Python",
        "experience_level": "beginner",
        "target_hours_per_week": 5.0,
        "focus_areas": ["scripting"],
        "constraints": [],
    })
    .to_string()
}

/// Curriculum document with `n` concepts named `c1..cn`, one stage, one
/// module.
pub fn curriculum_body(n: usize) -> String {
    let concepts: Vec<_> = (1..=n)
        .map(|i| {
            json!({
                "concept_id": format!("c{i}"),
                "title": format!("Concept {i}"),
                "description": "",
                "estimated_hours": 2.0,
            })
        })
        .collect();
    json!({
        "title": "Learn Python",
        "stages": [{
            "title": "Foundations",
            "order": 1,
            "modules": [{"title": "Core", "concepts": concepts}],
        }],
        "total_estimated_hours": 2.0 * n as f64,
        "recommended_completion_weeks": 2,
    })
    .to_string()
}

pub fn validation_pass_body() -> String {
    json!({"issues": [], "score": 0.92}).to_string()
}

pub fn validation_fail_body() -> String {
    json!({
        "issues": [{
            "severity": "major",
            "location": "stages[0]",
            "message": "module is too thin",
        }],
        "score": 0.4,
    })
    .to_string()
}

pub fn tutorial_body() -> String {
    json!({"summary": "A short tutorial", "body": "Step one. Step two."}).to_string()
}

pub fn resources_body() -> String {
    json!({
        "resources": [{
            "title": "Official docs",
            "url": "https://docs.example.com",
            "kind": "documentation",
            "reason": "canonical",
        }],
    })
    .to_string()
}

pub fn quiz_body() -> String {
    json!({
        "questions": [{
            "prompt": "What does this cover?",
            "choices": ["a", "b"],
            "answer_index": 0,
            "explanation": "",
        }],
    })
    .to_string()
}

/// Chat model that records the maximum number of concurrent calls.
pub struct CountingModel {
    body: String,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl CountingModel {
    pub fn new(body: String) -> Arc<Self> {
        Arc::new(Self {
            body,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatModel for CountingModel {
    async fn complete(&self, _: ChatRequest) -> Result<ChatResponse, AgentError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ChatResponse {
            message: ChatMessage::assistant(self.body.clone()),
        })
    }

    fn model_name(&self) -> &str {
        "counting"
    }
}
