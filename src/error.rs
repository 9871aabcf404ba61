//! Closed error taxonomy for the coordination kernel.
//!
//! Every kind maps to one of the exit codes in the CLI surface; components
//! below the command boundary are free to degrade (telemetry emission,
//! notably) but never swallow an I/O failure.

use std::path::PathBuf;
use thiserror::Error;

pub type SwarmResult<T> = Result<T, SwarmError>;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("timed out acquiring lock on {path:?} after {timeout_ms}ms")]
    LockTimeout { path: PathBuf, timeout_ms: u64 },

    #[error("id {id} already present in {store}")]
    DuplicateId { id: String, store: &'static str },

    #[error("{field} is invalid: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("fast-append record {work_item_id} missing required field {field} during promotion")]
    InvalidClaimRecord { work_item_id: String, field: &'static str },

    #[error("{id} is already in terminal state {status}; {op} is a no-op")]
    TerminalState {
        id: String,
        status: &'static str,
        op: &'static str,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{id} already registered")]
    AlreadyExists { id: String },

    #[error("io error on {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json in {path:?}: {source}")]
    MalformedJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SwarmError {
    /// Exit code per the CLI surface (spec §6.3 / §7).
    pub fn exit_code(&self) -> i32 {
        match self {
            SwarmError::InvalidArgument { .. } => 2,
            SwarmError::LockTimeout { .. } => 4,
            // Only ever surfaces after the one-retry-with-fresh-id policy
            // in `ClaimEngine::claim_slow` has already failed once.
            SwarmError::DuplicateId { .. } => 1,
            SwarmError::AlreadyExists { .. } => 3,
            SwarmError::NotFound { .. } => 6,
            // `complete` treats its own terminal-state race as idempotent
            // (0); every other op (`progress`) rejects it as an error (1).
            SwarmError::TerminalState { op: "complete", .. } => 0,
            SwarmError::TerminalState { .. } => 1,
            SwarmError::InvalidClaimRecord { .. } => 1,
            SwarmError::IoError { .. } => 1,
            SwarmError::MalformedJson { .. } => 1,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SwarmError::IoError { path: path.into(), source }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        SwarmError::MalformedJson { path: path.into(), source }
    }
}
