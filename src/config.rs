//! Process-wide engine configuration.
//!
//! Configuration is resolved once at startup (environment variables via
//! `dotenvy`, with documented defaults) and handed to [`crate::engine::Engine::init`].
//! Nothing in this module opens a pool or a connection; it only describes
//! what the engine should open explicitly later.
//!
//! The one hard rule lives in [`EngineConfig::validate`]: the configured
//! connection budget (business pool + overflow + checkpoint pool) must fit
//! under the database's advertised `max_connections` with a ten-connection
//! margin, and the process refuses to start otherwise.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::time::Duration;
use thiserror::Error;

use crate::agents::AgentKind;
use crate::types::ArtifactKind;

/// Margin kept free between our connection budget and the database limit.
const POOL_MARGIN: u32 = 10;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// Connection budget exceeds what the database can serve.
    #[error(
        "connection budget {budget} exceeds database limit {limit} (margin {margin}): \
         lower pool sizes or raise the database max_connections"
    )]
    #[diagnostic(
        code(roadweave::config::pool_budget),
        help("business pool + overflow + checkpoint pool + {margin} must be <= {limit}")
    )]
    PoolBudget { budget: u32, limit: u32, margin: u32 },

    /// A numeric environment variable failed to parse.
    #[error("invalid value for {var}: {value}")]
    #[diagnostic(code(roadweave::config::env_parse))]
    EnvParse { var: &'static str, value: String },
}

/// Sizing for the business connection pool.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub url: String,
    pub max_connections: u32,
    pub max_overflow: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://roadweave.db".to_string(),
            max_connections: 50,
            max_overflow: 50,
        }
    }
}

/// Sizing for the checkpoint store pool. Separate from the business pool so
/// checkpoint churn never starves repository work.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://roadweave_checkpoints.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Per-agent-variant construction settings.
#[derive(Clone, Debug, Default)]
pub struct AgentConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub credential: String,
}

/// Router knobs: which nodes to skip and how many editor passes to allow.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub skip_validation: bool,
    pub skip_human_review: bool,
    pub skip_content_generation: bool,
    pub max_edit_cycles: u32,
    /// Frameworks scoring below this need an editor pass.
    pub min_validation_score: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            skip_validation: false,
            skip_human_review: false,
            skip_content_generation: false,
            max_edit_cycles: 2,
            min_validation_score: 0.7,
        }
    }
}

/// Recovery sweeper settings.
#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    pub enable: bool,
    pub max_age_hours: u64,
    pub max_concurrent: usize,
    pub lease_ttl_seconds: u64,
    /// How often the periodic sweep re-runs after the startup pass.
    pub sweep_interval_seconds: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enable: true,
            max_age_hours: 24,
            max_concurrent: 4,
            lease_ttl_seconds: 900,
            sweep_interval_seconds: 3600,
        }
    }
}

/// Soft timeouts. An overrun LLM call surfaces as a transient failure; an
/// overrun workflow is cancelled by the sweeper.
#[derive(Clone, Debug)]
pub struct Timeouts {
    pub llm_call: Duration,
    pub workflow_budget: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            llm_call: Duration::from_secs(120),
            workflow_budget: Duration::from_secs(30 * 60),
        }
    }
}

/// Everything the engine needs to start.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub database: PoolConfig,
    pub checkpoint: CheckpointConfig,
    /// Database-advertised connection ceiling the budget is audited against.
    pub db_max_connections: u32,
    pub agents: FxHashMap<AgentKind, AgentConfig>,
    /// Concurrent LLM calls allowed per artifact kind during fan-out.
    pub semaphore_caps: FxHashMap<ArtifactKind, usize>,
    pub workflow: WorkflowConfig,
    pub recovery: RecoveryConfig,
    pub timeouts: Timeouts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut semaphore_caps = FxHashMap::default();
        for kind in ArtifactKind::ALL {
            semaphore_caps.insert(kind, 10);
        }
        Self {
            database: PoolConfig::default(),
            checkpoint: CheckpointConfig::default(),
            db_max_connections: 200,
            agents: FxHashMap::default(),
            semaphore_caps,
            workflow: WorkflowConfig::default(),
            recovery: RecoveryConfig::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Reads `.env` first (ignored if absent), then the `ROADWEAVE_*`
    /// variables. Agent endpoints share `ROADWEAVE_LLM_ENDPOINT` /
    /// `ROADWEAVE_LLM_MODEL` / `ROADWEAVE_LLM_API_KEY` unless a per-variant
    /// override is present (`ROADWEAVE_LLM_MODEL_<VARIANT>`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ROADWEAVE_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(url) = std::env::var("ROADWEAVE_CHECKPOINT_URL") {
            config.checkpoint.url = url;
        }
        config.database.max_connections = env_u32(
            "ROADWEAVE_POOL_SIZE",
            config.database.max_connections,
        )?;
        config.database.max_overflow = env_u32(
            "ROADWEAVE_POOL_OVERFLOW",
            config.database.max_overflow,
        )?;
        config.checkpoint.max_connections = env_u32(
            "ROADWEAVE_CHECKPOINT_POOL_SIZE",
            config.checkpoint.max_connections,
        )?;
        config.db_max_connections = env_u32(
            "ROADWEAVE_DB_MAX_CONNECTIONS",
            config.db_max_connections,
        )?;

        config.workflow.skip_validation = env_bool("ROADWEAVE_SKIP_VALIDATION", false);
        config.workflow.skip_human_review = env_bool("ROADWEAVE_SKIP_HUMAN_REVIEW", false);
        config.workflow.skip_content_generation =
            env_bool("ROADWEAVE_SKIP_CONTENT_GENERATION", false);
        config.workflow.max_edit_cycles =
            env_u32("ROADWEAVE_MAX_EDIT_CYCLES", config.workflow.max_edit_cycles)?;

        config.recovery.enable = env_bool("ROADWEAVE_ENABLE_RECOVERY", true);
        config.recovery.max_age_hours = u64::from(env_u32(
            "ROADWEAVE_RECOVERY_MAX_AGE_HOURS",
            config.recovery.max_age_hours as u32,
        )?);
        config.recovery.lease_ttl_seconds = u64::from(env_u32(
            "ROADWEAVE_LEASE_TTL_SECONDS",
            config.recovery.lease_ttl_seconds as u32,
        )?);

        config.timeouts.llm_call = Duration::from_secs(u64::from(env_u32(
            "ROADWEAVE_LLM_TIMEOUT_SECONDS",
            config.timeouts.llm_call.as_secs() as u32,
        )?));
        config.timeouts.workflow_budget = Duration::from_secs(u64::from(env_u32(
            "ROADWEAVE_WORKFLOW_BUDGET_SECONDS",
            config.timeouts.workflow_budget.as_secs() as u32,
        )?));

        let endpoint =
            std::env::var("ROADWEAVE_LLM_ENDPOINT").unwrap_or_else(|_| String::new());
        let model = std::env::var("ROADWEAVE_LLM_MODEL").unwrap_or_else(|_| String::new());
        let credential = std::env::var("ROADWEAVE_LLM_API_KEY").unwrap_or_else(|_| String::new());
        for kind in AgentKind::ALL {
            let model = std::env::var(format!(
                "ROADWEAVE_LLM_MODEL_{}",
                kind.encode().to_uppercase()
            ))
            .unwrap_or_else(|_| model.clone());
            config.agents.insert(
                kind,
                AgentConfig {
                    provider: "openai-compatible".to_string(),
                    model,
                    endpoint: endpoint.clone(),
                    credential: credential.clone(),
                },
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Audit the connection budget against the database ceiling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let budget = self.database.max_connections
            + self.database.max_overflow
            + self.checkpoint.max_connections;
        if budget + POOL_MARGIN > self.db_max_connections {
            return Err(ConfigError::PoolBudget {
                budget,
                limit: self.db_max_connections,
                margin: POOL_MARGIN,
            });
        }
        Ok(())
    }

    /// Semaphore cap for one artifact kind (default 10).
    #[must_use]
    pub fn semaphore_cap(&self, kind: ArtifactKind) -> usize {
        self.semaphore_caps.get(&kind).copied().unwrap_or(10)
    }
}

fn env_u32(var: &'static str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::EnvParse { var, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_bool(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(raw) => matches!(raw.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_fits() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_budget_is_refused() {
        let mut config = EngineConfig::default();
        config.db_max_connections = 100; // 50 + 50 + 10 + margin > 100
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::PoolBudget { .. }));
    }

    #[test]
    fn semaphore_cap_defaults_to_ten() {
        let mut config = EngineConfig::default();
        config.semaphore_caps.clear();
        assert_eq!(config.semaphore_cap(ArtifactKind::Quiz), 10);
    }
}
