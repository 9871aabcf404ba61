//! ID Generator (spec §4.A).
//!
//! Agent/work IDs are `<prefix>_<nanos>` with the nanosecond component kept
//! strictly monotonic within a process by busy-waiting past the last
//! emitted value — two calls racing on the same core never observe the same
//! timestamp. Trace/span IDs draw on `uuid`'s OS-backed CSPRNG rather than
//! hand-rolling an entropy source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Agent,
    Work,
    Trace,
    Span,
}

impl IdKind {
    fn prefix(&self) -> &'static str {
        match self {
            IdKind::Agent => "agent",
            IdKind::Work => "work",
            IdKind::Trace => "trace",
            IdKind::Span => "span",
        }
    }
}

/// Monotonic nanosecond-timestamp ID generator, shared per process.
pub struct IdGenerator {
    last_nanos: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { last_nanos: AtomicU64::new(0) }
    }

    /// Produces a strictly-increasing nanosecond timestamp for this process,
    /// busy-waiting past wall-clock ties or backward jumps.
    fn next_nanos(&self) -> u64 {
        loop {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before unix epoch")
                .as_nanos() as u64;

            let prev = self.last_nanos.load(Ordering::SeqCst);
            let candidate = if now > prev { now } else { prev + 1 };

            if self
                .last_nanos
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    pub fn new_id(&self, kind: IdKind) -> String {
        match kind {
            IdKind::Agent | IdKind::Work => {
                format!("{}_{}", kind.prefix(), self.next_nanos())
            }
            IdKind::Trace => uuid::Uuid::new_v4().simple().to_string(),
            IdKind::Span => {
                let full = uuid::Uuid::new_v4().simple().to_string();
                full[..16].to_string()
            }
        }
    }
}
