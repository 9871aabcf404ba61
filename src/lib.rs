//! Mathematical zero-conflict agent coordination, backed entirely by the
//! local filesystem: every claim, heartbeat, and completion is a durable
//! JSON record reachable without a database or network round trip.
//!
//! [`SwarmKernel`] is the composition root — it wires the Lock Manager,
//! Claims Store, Agent Registry, and Telemetry Emitter together once, and
//! hands out the Claim Engine, Retention Engine, Health Assessor, and Query
//! Surface as views over that shared state.

pub mod agent_registry;
pub mod claim_engine;
pub mod claims_store;
pub mod config;
pub mod error;
pub mod health;
pub mod ids;
pub mod lock;
pub mod model;
pub mod query;
pub mod retention;
pub mod telemetry;

pub use agent_registry::AgentRegistry;
pub use claim_engine::ClaimEngine;
pub use claims_store::ClaimsStore;
pub use config::CoordinationConfig;
pub use error::{SwarmError, SwarmResult};
pub use health::{HealthAssessor, HealthIssue, HealthReport, HealthStatus};
pub use ids::{IdGenerator, IdKind};
pub use lock::LockManager;
pub use model::{
    AgentFilter, AgentId, AgentPerformance, AgentRecord, AgentStatus, ClaimTelemetry, Priority,
    TelemetrySpan, WorkClaim, WorkFilter, WorkId, WorkResult, WorkStatus,
};
pub use query::QuerySurface;
pub use retention::{RetentionEngine, RetentionReport};
pub use telemetry::{SpanEmitter, TelemetryConfig, TelemetryManager, TelemetryMode};

use std::sync::Arc;
use std::time::Duration;

/// Assembles every component against one `CoordinationConfig`. Construct
/// once per process; clone freely — every field is an `Arc` or a cheaply
/// cloneable handle over shared on-disk state.
#[derive(Clone)]
pub struct SwarmKernel {
    pub config: CoordinationConfig,
    pub id_gen: Arc<IdGenerator>,
    pub lock_manager: Arc<LockManager>,
    pub claims: ClaimsStore,
    pub agents: AgentRegistry,
    pub spans: SpanEmitter,
    pub claim_engine: ClaimEngine,
    pub retention: RetentionEngine,
    pub health: HealthAssessor,
    pub query: QuerySurface,
}

impl SwarmKernel {
    pub fn new(config: CoordinationConfig) -> Self {
        let id_gen = Arc::new(IdGenerator::new());
        let lock_manager = Arc::new(LockManager::new());

        let claims = ClaimsStore::new(
            lock_manager.clone(),
            config.work_claims_path(),
            config.work_claims_fast_path(),
            config.lock_timeout,
        );
        let agents =
            AgentRegistry::new(lock_manager.clone(), config.agent_status_path(), config.lock_timeout);
        let spans = SpanEmitter::new(
            lock_manager.clone(),
            config.telemetry_spans_path(),
            config.service_name.clone(),
            config.service_version.clone(),
        );

        let claim_engine = ClaimEngine::new(
            id_gen.clone(),
            claims.clone(),
            agents.clone(),
            spans.clone(),
            config.service_name.clone(),
            lock_manager.clone(),
            config.coordination_log_path(),
        );
        let retention_spans = SpanEmitter::new(
            lock_manager.clone(),
            config.telemetry_spans_path(),
            "retention".to_string(),
            config.service_version.clone(),
        );
        let retention = RetentionEngine::new(
            claims.clone(),
            config.clone(),
            retention_spans,
            id_gen.clone(),
            lock_manager.clone(),
        );
        let health = HealthAssessor::new(claims.clone(), agents.clone(), config.clone());
        let query = QuerySurface::new(claims.clone());

        Self { config, id_gen, lock_manager, claims, agents, spans, claim_engine, retention, health, query }
    }

    pub fn from_env() -> Self {
        Self::new(CoordinationConfig::from_env())
    }

    pub fn lock_timeout(&self) -> Duration {
        self.config.lock_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn kernel_wires_a_working_claim_lifecycle() {
        let dir = tempdir().unwrap();
        let mut config = CoordinationConfig::default();
        config.coordination_dir = dir.path().to_path_buf();
        let kernel = SwarmKernel::new(config);

        kernel
            .agents
            .register_or_update("agent_1".into(), "dev".into(), 50, "rust".into())
            .await
            .unwrap();

        let claim = kernel
            .claim_engine
            .claim("agent_1", "feature", "cache layer", Priority::High, "dev")
            .await
            .unwrap();

        kernel.claim_engine.progress(&claim.work_item_id, 40).await.unwrap();
        let completed = kernel
            .claim_engine
            .complete(&claim.work_item_id, WorkResult::Success, Some(5))
            .await
            .unwrap();

        assert_eq!(completed.status, WorkStatus::Completed);
        assert_eq!(kernel.query.get(&claim.work_item_id).unwrap().unwrap().progress_percent, 100);

        let report = kernel.health.assess().await.unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);
    }
}
