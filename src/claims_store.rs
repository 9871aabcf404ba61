//! Claims Store — dual backend (spec §4.D).
//!
//! `canonical` is the full-array, read-modify-write representation used by
//! progress/complete/query/retention. `fast` is the line-delimited,
//! append-only hot path for new claims. Both are protected by the same
//! `LockManager`, one lock per file, never held simultaneously — the merge
//! logic that reconciles the two lives here and nowhere else, per the
//! "Dual storage" design note.

use crate::error::{SwarmError, SwarmResult};
use crate::lock::LockManager;
use crate::model::{WorkClaim, WorkFilter, WorkId};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

#[derive(Clone)]
pub struct ClaimsStore {
    lock_manager: Arc<LockManager>,
    canonical_path: PathBuf,
    fast_path: PathBuf,
    lock_timeout: Duration,
}

impl ClaimsStore {
    pub fn new(
        lock_manager: Arc<LockManager>,
        canonical_path: PathBuf,
        fast_path: PathBuf,
        lock_timeout: Duration,
    ) -> Self {
        Self { lock_manager, canonical_path, fast_path, lock_timeout }
    }

    /// Canonical read-modify-write insert; rejects duplicates.
    #[instrument(skip(self, claim), fields(work_item_id = %claim.work_item_id))]
    pub async fn insert(&self, claim: WorkClaim) -> SwarmResult<()> {
        let path = self.canonical_path.clone();
        self.lock_manager
            .with_lock(&path, self.lock_timeout, move || {
                let mut records = read_canonical(&path)?;
                if records.iter().any(|r| r.work_item_id == claim.work_item_id) {
                    return Err(SwarmError::DuplicateId {
                        id: claim.work_item_id.clone(),
                        store: "canonical",
                    });
                }
                records.push(claim);
                write_canonical(&path, &records)
            })
            .await
    }

    /// Fast-path append; no uniqueness check against canonical, since the
    /// ID Generator's monotonicity already guarantees the id is fresh.
    #[instrument(skip(self, claim), fields(work_item_id = %claim.work_item_id))]
    pub async fn append(&self, claim: &WorkClaim) -> SwarmResult<()> {
        let line = serde_json::to_string(claim).map_err(|e| SwarmError::json(&self.fast_path, e))?;
        let path = self.fast_path.clone();
        self.lock_manager
            .with_lock(&path, self.lock_timeout, move || append_line(&path, &line))
            .await
    }

    /// Canonical-only merge-patch; `patch` receives a mutable reference to
    /// the stored record and is responsible for invariant checks (caller
    /// supplies the business rule, the store supplies atomicity).
    #[instrument(skip(self, patch))]
    pub async fn update<F>(&self, work_id: &str, patch: F) -> SwarmResult<WorkClaim>
    where
        F: FnOnce(&mut WorkClaim) -> SwarmResult<()> + Send + 'static,
    {
        let path = self.canonical_path.clone();
        let work_id = work_id.to_string();
        self.lock_manager
            .with_lock(&path, self.lock_timeout, move || {
                let mut records = read_canonical(&path)?;
                let idx = records
                    .iter()
                    .position(|r| r.work_item_id == work_id)
                    .ok_or_else(|| SwarmError::NotFound { kind: "work_item", id: work_id.clone() })?;
                patch(&mut records[idx])?;
                let updated = records[idx].clone();
                write_canonical(&path, &records)?;
                Ok(updated)
            })
            .await
    }

    /// Inserts `claim` into canonical, tolerating the case where a
    /// concurrent promotion already landed it (idempotent).
    #[instrument(skip(self, claim), fields(work_item_id = %claim.work_item_id))]
    pub async fn promote_into_canonical(&self, claim: WorkClaim) -> SwarmResult<WorkClaim> {
        let path = self.canonical_path.clone();
        self.lock_manager
            .with_lock(&path, self.lock_timeout, move || {
                let mut records = read_canonical(&path)?;
                if let Some(existing) = records.iter().find(|r| r.work_item_id == claim.work_item_id) {
                    return Ok(existing.clone());
                }
                records.push(claim.clone());
                write_canonical(&path, &records)?;
                Ok(claim)
            })
            .await
    }

    /// Canonical record only, lock-free read.
    pub fn get_canonical(&self, work_id: &str) -> SwarmResult<Option<WorkClaim>> {
        let records = read_canonical(&self.canonical_path)?;
        Ok(records.into_iter().find(|r| r.work_item_id == work_id))
    }

    /// Fast-append record only, lock-free read. Tolerates a torn trailing
    /// line (a concurrent writer mid-append) by skipping and warning.
    pub fn get_fast(&self, work_id: &str) -> SwarmResult<Option<WorkClaim>> {
        Ok(read_fast(&self.fast_path)?.into_iter().find(|r| r.work_item_id == work_id))
    }

    /// Fast-append lookup that distinguishes "no such id" from "the line
    /// for this id exists but doesn't parse", per spec §4.F's promotion
    /// edge case: a malformed record must fail loudly with
    /// `InvalidClaimRecord`, not silently disappear the way `get_fast`'s
    /// skip-and-warn behavior would make it look like `NotFound`.
    pub fn get_fast_strict(&self, work_id: &str) -> SwarmResult<Option<WorkClaim>> {
        for line in read_fast_raw(&self.fast_path)? {
            let Some(id) = extract_work_item_id(&line) else { continue };
            if id != work_id {
                continue;
            }
            return match serde_json::from_str::<WorkClaim>(&line) {
                Ok(claim) => Ok(Some(claim)),
                Err(_) => Err(SwarmError::InvalidClaimRecord {
                    work_item_id: work_id.to_string(),
                    field: "<unparseable record>",
                }),
            };
        }
        Ok(None)
    }

    pub fn canonical_path(&self) -> &Path {
        &self.canonical_path
    }

    pub fn fast_path(&self) -> &Path {
        &self.fast_path
    }

    /// Merged view across both backends, canonical wins on conflict,
    /// de-duplicated by `work_item_id` (spec §4.D `list`).
    pub fn list_merged(&self, filter: &WorkFilter) -> SwarmResult<Vec<WorkClaim>> {
        let canonical = read_canonical(&self.canonical_path)?;
        let fast = read_fast(&self.fast_path)?;

        let mut by_id = std::collections::BTreeMap::new();
        for claim in fast {
            by_id.insert(claim.work_item_id.clone(), claim);
        }
        for claim in canonical {
            by_id.insert(claim.work_item_id.clone(), claim);
        }

        let mut merged: Vec<WorkClaim> = by_id
            .into_values()
            .filter(|c| matches_filter(c, filter))
            .collect();
        merged.sort_by_key(|c| c.claimed_at);
        Ok(merged)
    }

    /// Fast-count substring scan over the fast-append file for hot-path
    /// counting, per spec §4.I's "Fast count" query implementation.
    pub fn count_fast_contains(&self, needle: &str) -> SwarmResult<usize> {
        let contents = match std::fs::read_to_string(&self.fast_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(SwarmError::io(&self.fast_path, e)),
        };
        Ok(contents.lines().filter(|l| l.contains(needle)).count())
    }

    /// Compaction: when the fast-append file crosses `max_lines`, retain
    /// only the most recent `keep_lines`. Entries already present in
    /// canonical are dropped unconditionally regardless of age, since
    /// canonical is now their source of truth.
    #[instrument(skip(self))]
    pub async fn compact_fast(&self, max_lines: usize, keep_lines: usize) -> SwarmResult<(usize, usize)> {
        let canonical_path = self.canonical_path.clone();
        let fast_path = self.fast_path.clone();
        self.lock_manager
            .with_lock(&fast_path, self.lock_timeout, move || {
                let lines = read_fast_raw(&fast_path)?;
                let before = lines.len();
                if before <= max_lines {
                    return Ok((before, before));
                }

                let canonical = read_canonical(&canonical_path)?;
                let canonical_ids: std::collections::HashSet<&str> =
                    canonical.iter().map(|r| r.work_item_id.as_str()).collect();

                let mut retained: Vec<String> = lines
                    .into_iter()
                    .filter(|line| {
                        serde_json::from_str::<WorkClaim>(line)
                            .map(|c| !canonical_ids.contains(c.work_item_id.as_str()))
                            .unwrap_or(true)
                    })
                    .collect();

                if retained.len() > keep_lines {
                    let drop = retained.len() - keep_lines;
                    retained.drain(0..drop);
                }

                write_fast_raw(&fast_path, &retained)?;
                Ok((before, retained.len()))
            })
            .await
    }
}

fn matches_filter(claim: &WorkClaim, filter: &WorkFilter) -> bool {
    if let Some(team) = &filter.team {
        if &claim.team != team {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if claim.status != status {
            return false;
        }
    }
    if let Some(priority) = filter.priority {
        if claim.priority != priority {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if claim.claimed_at < since {
            return false;
        }
    }
    true
}

pub(crate) fn read_canonical(path: &Path) -> SwarmResult<Vec<WorkClaim>> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
        Ok(contents) => {
            serde_json::from_str(&contents).map_err(|e| SwarmError::json(path, e))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(SwarmError::io(path, e)),
    }
}

pub(crate) fn write_canonical(path: &Path, records: &[WorkClaim]) -> SwarmResult<()> {
    let body = serde_json::to_vec_pretty(records).map_err(|e| SwarmError::json(path, e))?;
    atomic_write(path, &body)
}

fn read_fast(path: &Path) -> SwarmResult<Vec<WorkClaim>> {
    Ok(read_fast_raw(path)?
        .into_iter()
        .filter_map(|line| match serde_json::from_str::<WorkClaim>(&line) {
            Ok(claim) => Some(claim),
            Err(e) => {
                warn!(path = ?path, error = %e, "skipping malformed fast-append line");
                None
            }
        })
        .collect())
}

/// Pulls `work_item_id` out of a fast-append line via a raw `Value` parse,
/// so a record with an otherwise-malformed shape can still be identified
/// (and then rejected with `InvalidClaimRecord` rather than skipped).
fn extract_work_item_id(line: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("work_item_id")?
        .as_str()
        .map(str::to_string)
}

fn read_fast_raw(path: &Path) -> SwarmResult<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(SwarmError::io(path, e)),
    }
}

fn write_fast_raw(path: &Path, lines: &[String]) -> SwarmResult<()> {
    let mut body = lines.join("\n");
    if !lines.is_empty() {
        body.push('\n');
    }
    atomic_write(path, body.as_bytes())
}

fn append_line(path: &Path, line: &str) -> SwarmResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SwarmError::io(parent, e))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SwarmError::io(path, e))?;
    writeln!(file, "{}", line).map_err(|e| SwarmError::io(path, e))?;
    file.sync_data().map_err(|e| SwarmError::io(path, e))
}

/// write-temp -> fsync -> rename, so readers never observe a torn file
/// (spec §4.D, testable property §8.1 item 3).
fn atomic_write(path: &Path, body: &[u8]) -> SwarmResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SwarmError::io(parent, e))?;
    }
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    let mut tmp = std::fs::File::create(&tmp_path).map_err(|e| SwarmError::io(&tmp_path, e))?;
    tmp.write_all(body).map_err(|e| SwarmError::io(&tmp_path, e))?;
    tmp.sync_all().map_err(|e| SwarmError::io(&tmp_path, e))?;
    drop(tmp);

    std::fs::rename(&tmp_path, path).map_err(|e| SwarmError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClaimTelemetry, Priority, WorkStatus};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_claim(id: &str) -> WorkClaim {
        let now = chrono::Utc::now();
        WorkClaim {
            work_item_id: id.to_string(),
            agent_id: "agent_1".to_string(),
            work_type: "feature".to_string(),
            description: "cache layer".to_string(),
            priority: Priority::High,
            team: "dev".to_string(),
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
            unknown_fields: BTreeMap::new(),
        }
    }

    fn store(dir: &tempfile::TempDir) -> ClaimsStore {
        ClaimsStore::new(
            Arc::new(LockManager::new()),
            dir.path().join("work_claims.json"),
            dir.path().join("work_claims_fast.jsonl"),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_id() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        store.insert(sample_claim("work_1")).await.unwrap();
        let err = store.insert(sample_claim("work_1")).await.unwrap_err();
        assert!(matches!(err, SwarmError::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn list_merges_and_prefers_canonical() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        store.append(&sample_claim("work_1")).await.unwrap();

        let mut canonical_version = sample_claim("work_1");
        canonical_version.progress_percent = 50;
        store.insert(canonical_version).await.unwrap();

        let merged = store.list_merged(&WorkFilter::default()).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].progress_percent, 50);
    }

    #[tokio::test]
    async fn compact_drops_promoted_entries() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        for i in 0..5 {
            store.append(&sample_claim(&format!("work_{i}"))).await.unwrap();
        }
        store.insert(sample_claim("work_0")).await.unwrap();

        let (before, after) = store.compact_fast(3, 2).await.unwrap();
        assert_eq!(before, 5);
        assert!(after <= 2);

        let merged = store.list_merged(&WorkFilter::default()).unwrap();
        assert!(merged.iter().any(|c| c.work_item_id == "work_0"));
    }
}
