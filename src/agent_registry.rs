//! Agent Registry (spec §4.E): upsert-by-identity agent records.
//!
//! Same read-modify-write + temp-file-rename discipline as the canonical
//! Claims Store, through the same `LockManager`. The registry exclusively
//! owns `AgentRecord`; no other component mutates it directly.

use crate::error::{SwarmError, SwarmResult};
use crate::lock::LockManager;
use crate::model::{AgentFilter, AgentId, AgentPerformance, AgentRecord, AgentStatus};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Clone)]
pub struct AgentRegistry {
    lock_manager: Arc<LockManager>,
    path: PathBuf,
    lock_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(lock_manager: Arc<LockManager>, path: PathBuf, lock_timeout: Duration) -> Self {
        Self { lock_manager, path, lock_timeout }
    }

    /// Idempotent upsert: inserts if absent, refreshes team/capacity/
    /// specialization and the heartbeat if present. Never duplicates.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn register_or_update(
        &self,
        agent_id: AgentId,
        team: String,
        capacity: u8,
        specialization: String,
    ) -> SwarmResult<AgentRecord> {
        if capacity == 0 || capacity > 100 {
            return Err(SwarmError::InvalidArgument {
                field: "capacity",
                reason: format!("{capacity} must be in 1..=100"),
            });
        }

        let path = self.path.clone();
        self.lock_manager
            .with_lock(&path, self.lock_timeout, move || {
                let mut records = read_registry(&path)?;
                let now = chrono::Utc::now();

                if let Some(existing) = records.iter_mut().find(|r| r.agent_id == agent_id) {
                    existing.team = team;
                    existing.capacity = capacity;
                    existing.specialization = specialization;
                    existing.status = AgentStatus::Active;
                    existing.last_heartbeat_at = now;
                    let updated = existing.clone();
                    write_registry(&path, &records)?;
                    return Ok(updated);
                }

                let record = AgentRecord {
                    agent_id: agent_id.clone(),
                    team,
                    specialization,
                    capacity,
                    current_workload: 0,
                    status: AgentStatus::Active,
                    last_heartbeat_at: now,
                    performance: AgentPerformance::default(),
                    unknown_fields: BTreeMap::new(),
                };
                records.push(record.clone());
                write_registry(&path, &records)?;
                Ok(record)
            })
            .await
    }

    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn heartbeat(&self, agent_id: &str) -> SwarmResult<()> {
        let path = self.path.clone();
        let agent_id = agent_id.to_string();
        self.lock_manager
            .with_lock(&path, self.lock_timeout, move || {
                let mut records = read_registry(&path)?;
                let record = records
                    .iter_mut()
                    .find(|r| r.agent_id == agent_id)
                    .ok_or_else(|| SwarmError::NotFound { kind: "agent", id: agent_id.clone() })?;
                record.last_heartbeat_at = chrono::Utc::now();
                record.status = AgentStatus::Active;
                write_registry(&path, &records)
            })
            .await
    }

    /// Moving-average completion time and success-rate update, invoked by
    /// the Claim Engine on `complete()`.
    #[instrument(skip(self), fields(agent_id = %agent_id))]
    pub async fn record_completion(
        &self,
        agent_id: &str,
        completion_ms: f64,
        succeeded: bool,
    ) -> SwarmResult<()> {
        let path = self.path.clone();
        let agent_id = agent_id.to_string();
        self.lock_manager
            .with_lock(&path, self.lock_timeout, move || {
                let mut records = read_registry(&path)?;
                if let Some(record) = records.iter_mut().find(|r| r.agent_id == agent_id) {
                    let perf = &mut record.performance;
                    let n = perf.tasks_completed as f64;
                    perf.avg_completion_ms = (perf.avg_completion_ms * n + completion_ms) / (n + 1.0);
                    perf.success_rate =
                        (perf.success_rate * n + if succeeded { 1.0 } else { 0.0 }) / (n + 1.0);
                    perf.tasks_completed += 1;
                    write_registry(&path, &records)?;
                }
                // An agent with no registry entry (crash-between-writes,
                // spec §7) is reconciled on its next heartbeat or register
                // call; completion accounting is not fatal here.
                Ok(())
            })
            .await
    }

    pub fn by_id(&self, agent_id: &str) -> SwarmResult<Option<AgentRecord>> {
        Ok(read_registry(&self.path)?.into_iter().find(|r| r.agent_id == agent_id))
    }

    pub fn list(&self, filter: &AgentFilter) -> SwarmResult<Vec<AgentRecord>> {
        Ok(read_registry(&self.path)?
            .into_iter()
            .filter(|r| {
                filter.team.as_ref().is_none_or(|t| &r.team == t)
                    && filter.status.is_none_or(|s| r.status == s)
            })
            .collect())
    }

    pub fn count_active_since(&self, since: chrono::DateTime<chrono::Utc>) -> SwarmResult<usize> {
        Ok(read_registry(&self.path)?
            .into_iter()
            .filter(|r| r.last_heartbeat_at >= since)
            .count())
    }

    /// Agents whose heartbeat predates `since` — supplemental read used by
    /// the Health Assessor and `list-agents --stale`.
    pub fn stale_since(&self, since: chrono::DateTime<chrono::Utc>) -> SwarmResult<Vec<AgentRecord>> {
        Ok(read_registry(&self.path)?
            .into_iter()
            .filter(|r| r.last_heartbeat_at < since)
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_registry(path: &Path) -> SwarmResult<Vec<AgentRecord>> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
        Ok(contents) => serde_json::from_str(&contents).map_err(|e| SwarmError::json(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(SwarmError::io(path, e)),
    }
}

fn write_registry(path: &Path, records: &[AgentRecord]) -> SwarmResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SwarmError::io(parent, e))?;
    }
    let body = serde_json::to_vec_pretty(records).map_err(|e| SwarmError::json(path, e))?;

    let tmp_path = path.with_extension("json.tmp");
    let mut tmp = std::fs::File::create(&tmp_path).map_err(|e| SwarmError::io(&tmp_path, e))?;
    tmp.write_all(&body).map_err(|e| SwarmError::io(&tmp_path, e))?;
    tmp.sync_all().map_err(|e| SwarmError::io(&tmp_path, e))?;
    drop(tmp);

    std::fs::rename(&tmp_path, path).map_err(|e| SwarmError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(dir: &tempfile::TempDir) -> AgentRegistry {
        AgentRegistry::new(
            Arc::new(LockManager::new()),
            dir.path().join("agent_status.json"),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn upsert_never_duplicates() {
        let dir = tempdir().unwrap();
        let reg = registry(&dir);
        reg.register_or_update("agent_1".into(), "dev".into(), 50, "rust".into()).await.unwrap();
        reg.register_or_update("agent_1".into(), "dev".into(), 80, "rust".into()).await.unwrap();

        let all = reg.list(&AgentFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].capacity, 80);
    }

    #[tokio::test]
    async fn heartbeat_refreshes_timestamp() {
        let dir = tempdir().unwrap();
        let reg = registry(&dir);
        reg.register_or_update("agent_1".into(), "dev".into(), 50, "rust".into()).await.unwrap();
        let before = reg.by_id("agent_1").unwrap().unwrap().last_heartbeat_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        reg.heartbeat("agent_1").await.unwrap();
        let after = reg.by_id("agent_1").unwrap().unwrap().last_heartbeat_at;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn rejects_out_of_range_capacity() {
        let dir = tempdir().unwrap();
        let reg = registry(&dir);
        let err = reg
            .register_or_update("agent_1".into(), "dev".into(), 0, "rust".into())
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArgument { .. }));
    }
}
