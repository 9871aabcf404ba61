//! Shared data model (spec §3.1): the on-disk record shapes owned
//! exclusively by the Claims Store, the Agent Registry, and the Telemetry
//! Emitter respectively. No component outside this module's owner mutates
//! these structs directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type AgentId = String;
pub type WorkId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Active,
    InProgress,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Completed | WorkStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkResult {
    Success,
    Failed,
    Blocked,
}

impl WorkResult {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
}

/// Trace context embedded in a `WorkClaim` (spec §9: one-directional —
/// claims point at the span that produced them, spans never point back).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTelemetry {
    pub trace_id: String,
    pub span_id: String,
    pub operation: String,
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkClaim {
    pub work_item_id: WorkId,
    pub agent_id: AgentId,
    pub work_type: String,
    pub description: String,
    pub priority: Priority,
    pub team: String,
    pub status: WorkStatus,
    pub progress_percent: u8,
    pub claimed_at: chrono::DateTime<chrono::Utc>,
    pub last_update_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_points: Option<u32>,
    pub telemetry: ClaimTelemetry,

    /// Fields this build doesn't know about are preserved verbatim on
    /// read-modify-write so forward-compatible additions round-trip.
    #[serde(flatten)]
    pub unknown_fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub tasks_completed: u64,
    pub avg_completion_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub team: String,
    pub specialization: String,
    pub capacity: u8,
    pub current_workload: u8,
    pub status: AgentStatus,
    pub last_heartbeat_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub performance: AgentPerformance,

    #[serde(flatten)]
    pub unknown_fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub span_kind: String,
    pub status: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    #[serde(rename = "service.name")]
    pub service_name: String,
    #[serde(rename = "service.version")]
    pub service_version: String,
    #[serde(default)]
    pub span_attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkFilter {
    pub team: Option<String>,
    pub status: Option<WorkStatus>,
    pub priority: Option<Priority>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFilter {
    pub team: Option<String>,
    pub status: Option<AgentStatus>,
}
