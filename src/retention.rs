//! Retention Engine (spec §4.G, supplemented by §B's telemetry rotation):
//! TTL pruning, completed-work archival, fast-file compaction, and
//! telemetry-span rotation. All four operations are idempotent — running
//! `optimize` twice in a row with no intervening writes is a no-op the
//! second time — and route through the same `LockManager` discipline as
//! the Claim Engine, one file lock at a time.

use crate::claims_store::ClaimsStore;
use crate::config::CoordinationConfig;
use crate::error::{SwarmError, SwarmResult};
use crate::ids::{IdGenerator, IdKind};
use crate::lock::LockManager;
use crate::model::WorkStatus;
use crate::telemetry::SpanEmitter;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RetentionReport {
    pub ttl_pruned: usize,
    pub archived: usize,
    pub fast_before: usize,
    pub fast_after: usize,
    pub telemetry_rotated: Option<PathBuf>,
}

#[derive(Clone)]
pub struct RetentionEngine {
    claims: ClaimsStore,
    config: CoordinationConfig,
    spans: SpanEmitter,
    id_gen: Arc<IdGenerator>,
    lock_manager: Arc<LockManager>,
}

impl RetentionEngine {
    pub fn new(
        claims: ClaimsStore,
        config: CoordinationConfig,
        spans: SpanEmitter,
        id_gen: Arc<IdGenerator>,
        lock_manager: Arc<LockManager>,
    ) -> Self {
        Self { claims, config, spans, id_gen, lock_manager }
    }

    /// Runs every retention operation once, in the order TTL prune ->
    /// archive -> compact -> rotate telemetry, and returns a summary.
    /// Emits one span under the service name `retention` with
    /// `lines_before`/`lines_after`/`records_archived`/`duration_ms`, per
    /// spec §4.G.
    #[instrument(skip(self))]
    pub async fn optimize(&self) -> SwarmResult<RetentionReport> {
        let start = Instant::now();
        let ttl_pruned = self.prune_expired().await?;
        let archived = self.archive_completed().await?;
        let (fast_before, fast_after) = self
            .claims
            .compact_fast(self.config.fast_max_lines, self.config.fast_keep_lines)
            .await?;
        let telemetry_rotated = self.rotate_telemetry().await?;

        let report = RetentionReport { ttl_pruned, archived, fast_before, fast_after, telemetry_rotated };
        info!(
            ttl_pruned = report.ttl_pruned,
            archived = report.archived,
            fast_before = report.fast_before,
            fast_after = report.fast_after,
            "retention pass complete"
        );

        let mut attrs = serde_json::Map::new();
        attrs.insert("lines_before".into(), fast_before.into());
        attrs.insert("lines_after".into(), fast_after.into());
        attrs.insert("records_archived".into(), (ttl_pruned + archived).into());
        attrs.insert("duration_ms".into(), (start.elapsed().as_millis() as u64).into());

        let trace_id = SpanEmitter::resolve_trace_id(None, &self.id_gen);
        let span = self.spans.new_span(
            trace_id,
            self.id_gen.new_id(IdKind::Span),
            None,
            "retention.optimize",
            start,
            "ok",
            attrs,
        );
        self.spans.emit(span).await;

        Ok(report)
    }

    /// Removes canonical claims whose last update predates the TTL window
    /// and are still non-terminal — they are considered abandoned, not
    /// archived history. The snapshot into `backups/` and the mutation
    /// happen under the same canonical lock the Claim Engine uses, so a
    /// concurrent `claim_slow`/`progress`/`complete` can never land between
    /// the backup and the prune, or have its write clobbered by this one.
    #[instrument(skip(self))]
    pub async fn prune_expired(&self) -> SwarmResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.ttl_hours as i64);
        let path = self.claims.canonical_path().to_path_buf();
        let before = self.claims.list_merged(&Default::default())?.len();

        let backups_dir = self.config.backups_dir();
        std::fs::create_dir_all(&backups_dir).map_err(|e| SwarmError::io(&backups_dir, e))?;
        let backup_path =
            backups_dir.join(format!("work_claims_{}.json", Utc::now().format("%Y%m%d_%H%M%S")));

        let lock_path = path.clone();
        self.lock_manager
            .with_lock(&lock_path, self.config.lock_timeout, move || {
                if path.exists() {
                    std::fs::copy(&path, &backup_path).map_err(|e| SwarmError::io(&backup_path, e))?;
                }
                let records = crate::claims_store::read_canonical(&path)?;
                let retained: Vec<_> = records
                    .into_iter()
                    .filter(|c| !(!c.status.is_terminal() && c.last_update_at < cutoff))
                    .collect();
                crate::claims_store::write_canonical(&path, &retained)
            })
            .await?;

        let after = self.claims.list_merged(&Default::default())?.len();
        Ok(before.saturating_sub(after))
    }

    /// Moves canonical records in a terminal state, older than
    /// `archive_after_hours`, out of `work_claims.json` into a dated file
    /// under `archived_claims/` once the canonical set crosses
    /// `archive_threshold` records — archival is a size-pressure relief
    /// valve, not a fixed schedule.
    #[instrument(skip(self))]
    pub async fn archive_completed(&self) -> SwarmResult<usize> {
        let canonical = self.claims.list_merged(&Default::default())?;
        if canonical.len() < self.config.archive_threshold {
            return Ok(0);
        }

        let cutoff = Utc::now() - chrono::Duration::hours(self.config.archive_after_hours as i64);
        let to_archive: Vec<_> = canonical
            .iter()
            .filter(|c| c.status.is_terminal() && c.completed_at.map(|t| t < cutoff).unwrap_or(false))
            .cloned()
            .collect();
        if to_archive.is_empty() {
            return Ok(0);
        }

        let archive_dir = self.config.archived_claims_dir();
        std::fs::create_dir_all(&archive_dir).map_err(|e| SwarmError::io(&archive_dir, e))?;
        let archive_path = archive_dir.join(format!("archive_{}.json", Utc::now().format("%Y%m%dT%H%M%S")));
        let body = serde_json::to_vec_pretty(&to_archive).map_err(|e| SwarmError::json(&archive_path, e))?;
        std::fs::write(&archive_path, body).map_err(|e| SwarmError::io(&archive_path, e))?;

        let path = self.claims.canonical_path().to_path_buf();
        let archived_ids: std::collections::HashSet<_> =
            to_archive.iter().map(|c| c.work_item_id.clone()).collect();
        self.remove_canonical_matching(&path, move |c| archived_ids.contains(&c.work_item_id))
            .await?;

        Ok(to_archive.len())
    }

    /// Canonical read-modify-write under the same lock `ClaimsStore::update`
    /// uses, so retention (an independent cron process) never races a
    /// concurrent claim/progress/complete into a lost write.
    async fn remove_canonical_matching<F>(&self, path: &Path, predicate: F) -> SwarmResult<()>
    where
        F: Fn(&crate::model::WorkClaim) -> bool + Send + 'static,
    {
        let path = path.to_path_buf();
        self.lock_manager
            .with_lock(&path, self.config.lock_timeout, move || {
                let records = crate::claims_store::read_canonical(&path)?;
                let retained: Vec<_> = records.into_iter().filter(|c| !predicate(c)).collect();
                crate::claims_store::write_canonical(&path, &retained)
            })
            .await
    }

    /// Rotates `telemetry_spans.jsonl` into `telemetry_archive/` once it
    /// exceeds `archive_threshold` lines, starting the live file fresh.
    /// Supplemental to spec.md's three named retention operations (§B).
    #[instrument(skip(self))]
    pub async fn rotate_telemetry(&self) -> SwarmResult<Option<PathBuf>> {
        let spans_path = self.config.telemetry_spans_path();
        let contents = match std::fs::read_to_string(&spans_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SwarmError::io(&spans_path, e)),
        };
        if contents.lines().count() < self.config.archive_threshold {
            return Ok(None);
        }

        let archive_dir = self.config.telemetry_archive_dir();
        std::fs::create_dir_all(&archive_dir).map_err(|e| SwarmError::io(&archive_dir, e))?;
        let archive_path =
            archive_dir.join(format!("telemetry_{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S")));
        std::fs::rename(&spans_path, &archive_path).map_err(|e| SwarmError::io(&spans_path, e))?;
        std::fs::File::create(&spans_path).map_err(|e| SwarmError::io(&spans_path, e))?;

        Ok(Some(archive_path))
    }
}
