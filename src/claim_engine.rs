//! Claim Engine (spec §4.F): the work-claim state machine.
//!
//! `claim` (fast path, hot) appends to the fast-append store and defers
//! canonical promotion to `progress`/`complete`/the Retention Engine's
//! `optimize` pass. `claim_slow` inserts directly into canonical, skipping
//! the fast path entirely — useful when a caller needs the record visible
//! to `list-work` (not just `list-work-fast`) immediately.
//!
//! `progress` and `complete` always operate against canonical: either
//! operation promotes a still-fast-only record on demand before patching it,
//! so every mutation past the initial claim sees (and leaves) one
//! authoritative copy.

use crate::agent_registry::AgentRegistry;
use crate::claims_store::ClaimsStore;
use crate::error::{SwarmError, SwarmResult};
use crate::ids::{IdGenerator, IdKind};
use crate::lock::LockManager;
use crate::model::{ClaimTelemetry, Priority, WorkClaim, WorkResult, WorkStatus};
use crate::telemetry::SpanEmitter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

#[derive(Clone)]
pub struct ClaimEngine {
    id_gen: Arc<IdGenerator>,
    claims: ClaimsStore,
    agents: AgentRegistry,
    spans: SpanEmitter,
    service_name: String,
    lock_manager: Arc<LockManager>,
    coordination_log_path: PathBuf,
}

impl ClaimEngine {
    pub fn new(
        id_gen: Arc<IdGenerator>,
        claims: ClaimsStore,
        agents: AgentRegistry,
        spans: SpanEmitter,
        service_name: String,
        lock_manager: Arc<LockManager>,
        coordination_log_path: PathBuf,
    ) -> Self {
        Self { id_gen, claims, agents, spans, service_name, lock_manager, coordination_log_path }
    }

    /// Bounds-checks `description` (1..1024 chars) and `team` (1..128
    /// chars) before any record is minted or written.
    fn validate_claim_fields(description: &str, team: &str) -> SwarmResult<()> {
        let description_len = description.chars().count();
        if description_len == 0 || description_len > 1024 {
            return Err(SwarmError::InvalidArgument {
                field: "description",
                reason: format!("length {description_len} outside 1..1024"),
            });
        }
        let team_len = team.chars().count();
        if team_len == 0 || team_len > 128 {
            return Err(SwarmError::InvalidArgument {
                field: "team",
                reason: format!("length {team_len} outside 1..128"),
            });
        }
        Ok(())
    }

    fn new_claim(&self, agent_id: &str, work_type: &str, description: &str, priority: Priority, team: &str) -> WorkClaim {
        let now = chrono::Utc::now();
        let trace_id = SpanEmitter::resolve_trace_id(None, &self.id_gen);
        WorkClaim {
            work_item_id: self.id_gen.new_id(IdKind::Work),
            agent_id: agent_id.to_string(),
            work_type: work_type.to_string(),
            description: description.to_string(),
            priority,
            team: team.to_string(),
            status: WorkStatus::Active,
            progress_percent: 0,
            claimed_at: now,
            last_update_at: now,
            completed_at: None,
            result: None,
            velocity_points: None,
            telemetry: ClaimTelemetry {
                trace_id,
                span_id: self.id_gen.new_id(IdKind::Span),
                operation: "work.claim".to_string(),
                service: self.service_name.clone(),
            },
            unknown_fields: Default::default(),
        }
    }

    /// Fast path: append-only, no canonical lock held.
    #[instrument(skip(self))]
    pub async fn claim(
        &self,
        agent_id: &str,
        work_type: &str,
        description: &str,
        priority: Priority,
        team: &str,
    ) -> SwarmResult<WorkClaim> {
        Self::validate_claim_fields(description, team)?;
        let start = Instant::now();
        let claim = self.new_claim(agent_id, work_type, description, priority, team);
        self.claims.append(&claim).await?;
        self.emit(&claim, "work.claim.fast", start, "ok").await;
        Ok(claim)
    }

    /// Slow path: inserts straight into canonical under the full lock. A
    /// `DuplicateId` (the ID Generator's monotonicity makes this
    /// practically unreachable) gets one retry with a freshly minted id
    /// before the call fails outright.
    #[instrument(skip(self))]
    pub async fn claim_slow(
        &self,
        agent_id: &str,
        work_type: &str,
        description: &str,
        priority: Priority,
        team: &str,
    ) -> SwarmResult<WorkClaim> {
        Self::validate_claim_fields(description, team)?;
        let start = Instant::now();
        let mut claim = self.new_claim(agent_id, work_type, description, priority, team);
        match self.claims.insert(claim.clone()).await {
            Ok(()) => {}
            Err(SwarmError::DuplicateId { id, .. }) => {
                tracing::warn!(work_item_id = %id, "id collision on claim, retrying with a fresh id");
                claim.work_item_id = self.id_gen.new_id(IdKind::Work);
                self.claims.insert(claim.clone()).await?;
            }
            Err(e) => return Err(e),
        }
        self.emit(&claim, "work.claim.slow", start, "ok").await;
        Ok(claim)
    }

    /// Monotonic progress update. Rejects regression and mutation of a
    /// terminal record; promotes a fast-only claim into canonical first.
    #[instrument(skip(self))]
    pub async fn progress(&self, work_id: &str, percent: u8) -> SwarmResult<WorkClaim> {
        if percent > 100 {
            return Err(SwarmError::InvalidArgument {
                field: "percent",
                reason: format!("{percent} exceeds 100"),
            });
        }
        let start = Instant::now();
        self.ensure_promoted(work_id).await?;

        let updated = self
            .claims
            .update(work_id, move |claim| {
                if claim.status.is_terminal() {
                    return Err(SwarmError::TerminalState {
                        id: claim.work_item_id.clone(),
                        status: terminal_label(claim.status),
                        op: "progress",
                    });
                }
                if percent < claim.progress_percent {
                    return Err(SwarmError::InvalidArgument {
                        field: "percent",
                        reason: format!(
                            "{percent} regresses from current progress {}",
                            claim.progress_percent
                        ),
                    });
                }
                claim.progress_percent = percent;
                claim.status = WorkStatus::InProgress;
                claim.last_update_at = chrono::Utc::now();
                Ok(())
            })
            .await?;

        self.emit(&updated, "work.progress", start, "ok").await;
        Ok(updated)
    }

    /// Transitions a claim into a terminal state and records the agent's
    /// completion performance. Re-completing an already-terminal claim is
    /// an idempotent no-op that logs a warning, rather than an error — the
    /// asymmetry with `progress` (which rejects a post-terminal update) is
    /// deliberate: a caller racing a retry against its own successful
    /// completion should not see a failure.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        work_id: &str,
        result: WorkResult,
        velocity_points: Option<u32>,
    ) -> SwarmResult<WorkClaim> {
        let start = Instant::now();
        self.ensure_promoted(work_id).await?;

        if let Some(existing) = self.claims.get_canonical(work_id)? {
            if existing.status.is_terminal() {
                tracing::warn!(
                    work_item_id = %work_id,
                    status = terminal_label(existing.status),
                    "complete() called again on an already-terminal claim; ignoring"
                );
                return Ok(existing);
            }
        }

        let claimed_at_agent = self.claims.get_canonical(work_id)?.map(|c| (c.agent_id, c.claimed_at));

        let updated = self
            .claims
            .update(work_id, move |claim| {
                if claim.status.is_terminal() {
                    return Err(SwarmError::TerminalState {
                        id: claim.work_item_id.clone(),
                        status: terminal_label(claim.status),
                        op: "complete",
                    });
                }
                let now = chrono::Utc::now();
                claim.status = match result {
                    WorkResult::Success => WorkStatus::Completed,
                    WorkResult::Failed | WorkResult::Blocked => WorkStatus::Failed,
                };
                claim.progress_percent = 100;
                claim.result = Some(result);
                claim.velocity_points = velocity_points;
                claim.completed_at = Some(now);
                claim.last_update_at = now;
                Ok(())
            })
            .await?;

        if let Some((agent_id, claimed_at)) = claimed_at_agent {
            let completion_ms = (chrono::Utc::now() - claimed_at).num_milliseconds().max(0) as f64;
            let _ = self
                .agents
                .record_completion(&agent_id, completion_ms, matches!(result, WorkResult::Success))
                .await;
        }

        self.append_coordination_log(&updated).await;
        self.emit(&updated, "work.complete", start, "ok").await;
        Ok(updated)
    }

    /// Best-effort append of a completed/failed claim to
    /// `coordination_log.json` — an optional, supplemental history; the
    /// canonical store and its archive remain the source of truth, so a
    /// failure here is logged but never propagated.
    async fn append_coordination_log(&self, claim: &WorkClaim) {
        let path = self.coordination_log_path.clone();
        let claim = claim.clone();
        let result = self
            .lock_manager
            .with_lock(&path, std::time::Duration::from_secs(5), move || {
                let mut records: Vec<WorkClaim> = match std::fs::read_to_string(&path) {
                    Ok(body) => serde_json::from_str(&body).unwrap_or_default(),
                    Err(_) => Vec::new(),
                };
                records.push(claim);
                let body =
                    serde_json::to_vec_pretty(&records).map_err(|e| SwarmError::json(&path, e))?;
                std::fs::write(&path, body).map_err(|e| SwarmError::io(&path, e))
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to append to coordination_log.json (non-authoritative)");
        }
    }

    /// Promotes a fast-only claim into canonical so subsequent mutation has
    /// a single authoritative record to act on.
    async fn ensure_promoted(&self, work_id: &str) -> SwarmResult<()> {
        if self.claims.get_canonical(work_id)?.is_some() {
            return Ok(());
        }
        let fast = self
            .claims
            .get_fast_strict(work_id)?
            .ok_or_else(|| SwarmError::NotFound { kind: "work_item", id: work_id.to_string() })?;
        self.claims.promote_into_canonical(fast).await?;
        Ok(())
    }

    async fn emit(&self, claim: &WorkClaim, operation: &str, start: Instant, status: &str) {
        metrics::counter!("swarmkernel_claims_total", "operation" => operation.to_string()).increment(1);
        metrics::histogram!("swarmkernel_claim_duration_ms", "operation" => operation.to_string())
            .record(start.elapsed().as_secs_f64() * 1000.0);
        if claim.status.is_terminal() {
            metrics::counter!("swarmkernel_completions_total", "result" => terminal_label(claim.status))
                .increment(1);
        }

        let mut attrs = serde_json::Map::new();
        attrs.insert("work_item_id".into(), claim.work_item_id.clone().into());
        attrs.insert("agent_id".into(), claim.agent_id.clone().into());
        attrs.insert("status".into(), claim.status.as_str().into());

        let span = self.spans.new_span(
            claim.telemetry.trace_id.clone(),
            self.id_gen.new_id(IdKind::Span),
            Some(claim.telemetry.span_id.clone()),
            operation,
            start,
            status,
            attrs,
        );
        self.spans.emit(span).await;
    }
}

fn terminal_label(status: WorkStatus) -> &'static str {
    match status {
        WorkStatus::Completed => "completed",
        WorkStatus::Failed => "failed",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use std::time::Duration;
    use tempfile::tempdir;

    fn engine(dir: &tempfile::TempDir) -> ClaimEngine {
        let lock_manager = Arc::new(LockManager::new());
        let claims = ClaimsStore::new(
            lock_manager.clone(),
            dir.path().join("work_claims.json"),
            dir.path().join("work_claims_fast.jsonl"),
            Duration::from_secs(5),
        );
        let agents = AgentRegistry::new(
            lock_manager.clone(),
            dir.path().join("agent_status.json"),
            Duration::from_secs(5),
        );
        let spans = SpanEmitter::new(
            lock_manager.clone(),
            dir.path().join("telemetry_spans.jsonl"),
            "test".into(),
            "0.1.0".into(),
        );
        ClaimEngine::new(
            Arc::new(IdGenerator::new()),
            claims,
            agents,
            spans,
            "test".into(),
            lock_manager,
            dir.path().join("coordination_log.json"),
        )
    }

    #[tokio::test]
    async fn fast_claim_then_progress_promotes() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let claim = engine.claim("agent_1", "feature", "cache", Priority::High, "dev").await.unwrap();

        let updated = engine.progress(&claim.work_item_id, 50).await.unwrap();
        assert_eq!(updated.progress_percent, 50);
        assert_eq!(updated.status, WorkStatus::InProgress);
        assert!(engine.claims.get_canonical(&claim.work_item_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn progress_rejects_regression() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let claim = engine.claim_slow("agent_1", "feature", "cache", Priority::High, "dev").await.unwrap();
        engine.progress(&claim.work_item_id, 60).await.unwrap();

        let err = engine.progress(&claim.work_item_id, 30).await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn completing_twice_is_an_idempotent_no_op() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let claim = engine.claim_slow("agent_1", "feature", "cache", Priority::High, "dev").await.unwrap();
        let first = engine.complete(&claim.work_item_id, WorkResult::Success, Some(3)).await.unwrap();

        let second = engine.complete(&claim.work_item_id, WorkResult::Success, Some(3)).await.unwrap();
        assert_eq!(second.status, first.status);
        assert_eq!(second.completed_at, first.completed_at);
    }

    #[tokio::test]
    async fn progress_after_complete_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let claim = engine.claim_slow("agent_1", "feature", "cache", Priority::High, "dev").await.unwrap();
        engine.complete(&claim.work_item_id, WorkResult::Success, Some(3)).await.unwrap();

        let err = engine.progress(&claim.work_item_id, 50).await.unwrap_err();
        assert!(matches!(err, SwarmError::TerminalState { .. }));
    }

    #[tokio::test]
    async fn claim_rejects_empty_description() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let err = engine.claim("agent_1", "feature", "", Priority::High, "dev").await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArgument { field: "description", .. }));
    }

    #[tokio::test]
    async fn claim_rejects_oversized_description() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let description = "x".repeat(1025);
        let err =
            engine.claim("agent_1", "feature", &description, Priority::High, "dev").await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArgument { field: "description", .. }));
    }

    #[tokio::test]
    async fn claim_slow_rejects_empty_team() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let err =
            engine.claim_slow("agent_1", "feature", "cache", Priority::High, "").await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArgument { field: "team", .. }));
    }

    #[tokio::test]
    async fn claim_slow_rejects_oversized_team() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let team = "x".repeat(129);
        let err =
            engine.claim_slow("agent_1", "feature", "cache", Priority::High, &team).await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArgument { field: "team", .. }));
    }

    #[tokio::test]
    async fn complete_appends_to_coordination_log() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir);
        let claim = engine.claim_slow("agent_1", "feature", "cache", Priority::High, "dev").await.unwrap();
        engine.complete(&claim.work_item_id, WorkResult::Success, Some(8)).await.unwrap();

        let body = std::fs::read_to_string(dir.path().join("coordination_log.json")).unwrap();
        let records: Vec<WorkClaim> = serde_json::from_str(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].velocity_points, Some(8));
    }
}
