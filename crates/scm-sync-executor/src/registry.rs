//! The executor contract and the job-type dispatch table: one trait, one
//! entry point, a context object carrying the dependencies instead of a
//! constructor full of them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scm_sync_core::{
    Cursor, CursorStore, ErrorCategory, PhysicalJobType, RepoInfo, RepoStore, RunCounts, RunId,
    SyncLockManager, SyncMode, SyncRunStore, WorkerId,
};

use crate::errors::ExecutorError;

/// The store dependencies a `JobExecutor` and the ten-phase driver share,
/// bundled so a new executor doesn't grow its own constructor every time
/// the driver needs one more store.
#[derive(Clone)]
pub struct ExecutorStores {
    pub repos: Arc<dyn RepoStore>,
    pub cursors: Arc<dyn CursorStore>,
    pub locks: Arc<dyn SyncLockManager>,
    pub runs: Arc<dyn SyncRunStore>,
}

/// Everything phases 5-9 need to do their work, assembled by the driver
/// before it calls into a concrete [`JobExecutor`].
pub struct ExecutionContext<'a> {
    pub repo: &'a RepoInfo,
    pub job_type: PhysicalJobType,
    pub mode: SyncMode,
    pub run_id: RunId,
    pub worker_id: &'a WorkerId,
    pub cursor_before: &'a Cursor,
    pub strict: bool,
    pub since_override: Option<DateTime<Utc>>,
    pub until_override: Option<DateTime<Utc>>,
    pub suggested_batch_size: Option<u32>,
    pub tenant_id: Option<&'a str>,
    /// Checked at the documented safe points (between batches, never
    /// mid-batch). `true` means the lease was lost underneath this run and
    /// work must stop without writing a cursor advance.
    pub should_abort: &'a (dyn Fn() -> bool + Send + Sync),
    /// The sync lock this run is already holding, so a long multi-request
    /// job (review sync, one MR = several remote calls) can renew it every
    /// N records independent of the queue-lease heartbeat. Renewal failure here means the same thing as a
    /// heartbeat failure: the executor should treat the run as abandoned
    /// at its next safe point.
    pub locks: Arc<dyn SyncLockManager>,
}

/// What a single window's worth of work produced. The driver applies
/// [`crate::decide::decide_cursor_advance`] to `candidate_cursor` and
/// `unrecoverable_errors`; it never inspects `counts` itself.
#[derive(Debug, Clone, Default)]
pub struct WindowOutcome {
    pub counts: RunCounts,
    pub candidate_cursor: Option<Cursor>,
    pub unrecoverable_errors: Vec<ErrorCategory>,
    /// Record types the executor couldn't determine existed at all
    /// (distinct from a record it saw and failed to fetch detail for).
    pub missing_types: Vec<String>,
    /// Set when the batch must stop immediately rather than degrade:
    /// a permanent classification (auth, not-found, permission) reached
    /// mid-window. The driver fails the run with this category/message
    /// regardless of `strict`.
    pub fatal: Option<(ErrorCategory, String)>,
    pub aborted_for_lease_loss: bool,
}

impl WindowOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One concrete sync strategy (GitLab commits/MRs/reviews, or SVN
/// revisions). Implementors own their own window/pagination logic —
/// time-cursor and revision-cursor windowing are structurally different
/// enough that a shared driver-level window computation would not serve
/// both cleanly.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn job_type(&self) -> PhysicalJobType;

    async fn run_window(
        &self,
        cx: &ExecutionContext<'_>,
    ) -> Result<WindowOutcome, ExecutorError>;
}

/// Maps a [`PhysicalJobType`] to its executor. `LogicalJobType::resolve`
/// (scm-sync-core) is applied by the caller before lookup, so this map only
/// ever sees physical keys.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<PhysicalJobType, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self { executors: HashMap::new() }
    }

    pub fn register(&mut self, executor: Arc<dyn JobExecutor>) {
        self.executors.insert(executor.job_type(), executor);
    }

    pub fn get(&self, job_type: PhysicalJobType) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(&job_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubExecutor(PhysicalJobType);

    #[async_trait]
    impl JobExecutor for StubExecutor {
        fn job_type(&self) -> PhysicalJobType {
            self.0
        }

        async fn run_window(&self, _cx: &ExecutionContext<'_>) -> Result<WindowOutcome, ExecutorError> {
            Ok(WindowOutcome::empty())
        }
    }

    #[test]
    fn registry_dispatches_by_physical_job_type() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(StubExecutor(PhysicalJobType::GitlabCommits)));
        registry.register(Arc::new(StubExecutor(PhysicalJobType::Svn)));

        assert!(registry.get(PhysicalJobType::GitlabCommits).is_some());
        assert!(registry.get(PhysicalJobType::Svn).is_some());
        assert!(registry.get(PhysicalJobType::GitlabMrs).is_none());
    }
}
