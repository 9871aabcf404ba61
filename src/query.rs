//! Query Surface (spec §4.I): read-only views over the Claims Store and
//! Agent Registry. Every method here is lock-free — it reads whatever is
//! on disk at the moment of the call, which is why `list`/`get` are only
//! ever eventually consistent with an in-flight write.

use crate::claims_store::ClaimsStore;
use crate::error::SwarmResult;
use crate::model::{WorkClaim, WorkFilter};
use std::collections::BTreeMap;

#[derive(Clone)]
pub struct QuerySurface {
    claims: ClaimsStore,
}

impl QuerySurface {
    pub fn new(claims: ClaimsStore) -> Self {
        Self { claims }
    }

    /// Canonical-first, falling back to the fast-append store — mirrors
    /// the precedence `list` already applies across both backends.
    pub fn get(&self, work_id: &str) -> SwarmResult<Option<WorkClaim>> {
        if let Some(claim) = self.claims.get_canonical(work_id)? {
            return Ok(Some(claim));
        }
        self.claims.get_fast(work_id)
    }

    pub fn list(&self, filter: &WorkFilter) -> SwarmResult<Vec<WorkClaim>> {
        self.claims.list_merged(filter)
    }

    /// Fast-count path (spec §4.I "Fast count"): a substring scan over the
    /// append-only file instead of a full parse, used when the caller only
    /// needs a rough count of claims matching a team or status string.
    pub fn count_fast(&self, needle: &str) -> SwarmResult<usize> {
        self.claims.count_fast_contains(needle)
    }

    /// Groups the merged view by one of `team`, `status`, `priority`,
    /// `agent_id`, `work_type`.
    pub fn count_by(&self, group_by_field: &str) -> SwarmResult<BTreeMap<String, usize>> {
        let claims = self.claims.list_merged(&WorkFilter::default())?;
        let mut counts = BTreeMap::new();
        for claim in claims {
            let key = match group_by_field {
                "team" => claim.team.clone(),
                "status" => claim.status.as_str().to_string(),
                "priority" => claim.priority.as_str().to_string(),
                "agent_id" => claim.agent_id.clone(),
                "work_type" => claim.work_type.clone(),
                other => other.to_string(),
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockManager;
    use crate::model::{ClaimTelemetry, Priority, WorkStatus};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample(id: &str, team: &str) -> WorkClaim {
        let now = chrono::Utc::now();
        WorkClaim {
            work_item_id: id.to_string(),
            agent_id: "agent_1".to_string(),
            work_type: "feature".to_string(),
            description: "d".to_string(),
            priority: Priority::Medium,
            team: team.to_string(),
            status: WorkStatus::Active,
            progress_percent: 0,
            claimed_at: now,
            last_update_at: now,
            completed_at: None,
            result: None,
            velocity_points: None,
            telemetry: ClaimTelemetry {
                trace_id: "t".into(),
                span_id: "s".into(),
                operation: "work.claim".into(),
                service: "test".into(),
            },
            unknown_fields: Default::default(),
        }
    }

    #[tokio::test]
    async fn count_by_team_tallies_merged_view() {
        let dir = tempdir().unwrap();
        let claims = ClaimsStore::new(
            Arc::new(LockManager::new()),
            dir.path().join("work_claims.json"),
            dir.path().join("work_claims_fast.jsonl"),
            Duration::from_secs(5),
        );
        claims.insert(sample("work_1", "dev")).await.unwrap();
        claims.append(&sample("work_2", "dev")).await.unwrap();
        claims.append(&sample("work_3", "qa")).await.unwrap();

        let query = QuerySurface::new(claims);
        let counts = query.count_by("team").unwrap();
        assert_eq!(counts["dev"], 2);
        assert_eq!(counts["qa"], 1);
    }
}
