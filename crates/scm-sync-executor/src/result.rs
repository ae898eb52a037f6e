//! Closed result type for one executor invocation
//! (no untyped result maps).

use scm_sync_core::{ErrorCategory, RunCounts, RunId};

/// The outcome of phase 10, as a closed set of variants instead of a loose
/// result map.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorResultKind {
    Ok,
    /// Phase 3 couldn't acquire the sync lock. Not a failure.
    Locked,
    Failed { category: ErrorCategory, detail: String },
    /// The heartbeat signalled `should_abort` at a safe point.
    LeaseLost,
}

#[derive(Debug, Clone)]
pub struct ExecutorResult {
    pub kind: ExecutorResultKind,
    pub run_id: Option<RunId>,
    pub counts: RunCounts,
    pub cursor_advance_reason: Option<String>,
    pub watermark_updated: bool,
    pub missing_types: Vec<String>,
}

impl ExecutorResult {
    pub fn locked() -> Self {
        Self {
            kind: ExecutorResultKind::Locked,
            run_id: None,
            counts: RunCounts::new(),
            cursor_advance_reason: None,
            watermark_updated: false,
            missing_types: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.kind, ExecutorResultKind::Ok)
    }

    /// `locked: true, skipped: true, success: true`
    /// — distinct from an ordinary success (no run_id, no counts written).
    pub fn is_skipped(&self) -> bool {
        matches!(self.kind, ExecutorResultKind::Locked)
    }
}
