//! Environment-derived configuration (spec §6.4).
//!
//! Only this module and the CLI binary read `std::env`; the engine types
//! take every value as an explicit constructor or method parameter, per the
//! "no ambient global state" design note in spec §9.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    pub coordination_dir: PathBuf,
    pub service_name: String,
    pub service_version: String,
    pub enable_fast_path: bool,
    pub lock_timeout: Duration,
    pub ttl_hours: u64,
    pub archive_after_hours: u64,
    pub archive_threshold: usize,
    pub fast_max_lines: usize,
    pub fast_keep_lines: usize,

    /// Health Assessor thresholds (spec §4.H's penalty table).
    pub max_stale_hours: u64,
    pub max_active: usize,
    pub min_completion_rate: f64,
    pub max_failure_rate: f64,
    pub max_disk_usage_percent: f64,
    pub max_memory_usage_percent: f64,
    pub health_alert_threshold: u8,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            coordination_dir: PathBuf::from("./coordination"),
            service_name: "swarmkernel".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            enable_fast_path: true,
            lock_timeout: Duration::from_secs(30),
            ttl_hours: 24,
            archive_after_hours: 168,
            archive_threshold: 1000,
            fast_max_lines: 100,
            fast_keep_lines: 50,

            max_stale_hours: 1,
            max_active: 500,
            min_completion_rate: 0.5,
            max_failure_rate: 0.3,
            max_disk_usage_percent: 90.0,
            max_memory_usage_percent: 95.0,
            health_alert_threshold: 70,
        }
    }
}

impl CoordinationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            coordination_dir: std::env::var("COORDINATION_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.coordination_dir),
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: std::env::var("OTEL_SERVICE_VERSION")
                .unwrap_or(defaults.service_version),
            enable_fast_path: std::env::var("ENABLE_FAST_PATH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.enable_fast_path),
            lock_timeout: std::env::var("LOCK_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            ttl_hours: env_u64("TTL_HOURS", defaults.ttl_hours),
            archive_after_hours: defaults.archive_after_hours,
            archive_threshold: env_u64("ARCHIVE_THRESHOLD", defaults.archive_threshold as u64)
                as usize,
            fast_max_lines: env_u64("FAST_MAX_LINES", defaults.fast_max_lines as u64) as usize,
            fast_keep_lines: env_u64("FAST_KEEP_LINES", defaults.fast_keep_lines as u64) as usize,

            max_stale_hours: env_u64("MAX_STALE_HOURS", defaults.max_stale_hours),
            max_active: env_u64("MAX_ACTIVE_CLAIMS", defaults.max_active as u64) as usize,
            min_completion_rate: defaults.min_completion_rate,
            max_failure_rate: defaults.max_failure_rate,
            max_disk_usage_percent: defaults.max_disk_usage_percent,
            max_memory_usage_percent: defaults.max_memory_usage_percent,
            health_alert_threshold: env_u64(
                "HEALTH_ALERT_THRESHOLD",
                defaults.health_alert_threshold as u64,
            ) as u8,
        }
    }

    pub fn work_claims_path(&self) -> PathBuf {
        self.coordination_dir.join("work_claims.json")
    }

    pub fn work_claims_fast_path(&self) -> PathBuf {
        self.coordination_dir.join("work_claims_fast.jsonl")
    }

    pub fn agent_status_path(&self) -> PathBuf {
        self.coordination_dir.join("agent_status.json")
    }

    pub fn coordination_log_path(&self) -> PathBuf {
        self.coordination_dir.join("coordination_log.json")
    }

    pub fn telemetry_spans_path(&self) -> PathBuf {
        self.coordination_dir.join("telemetry_spans.jsonl")
    }

    pub fn archived_claims_dir(&self) -> PathBuf {
        self.coordination_dir.join("archived_claims")
    }

    pub fn telemetry_archive_dir(&self) -> PathBuf {
        self.coordination_dir.join("telemetry_archive")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.coordination_dir.join("backups")
    }

    pub fn health_report_path(&self) -> PathBuf {
        self.coordination_dir.join("system_health_report.json")
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
