//! `SyncRun`: one durable record per executor invocation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cursor::Cursor;
use crate::ids::{PhysicalJobType, RepoId, RunId, SyncMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
    NoData,
}

impl SyncRunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SyncRunStatus::Running)
    }
}

pub type RunCounts = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SyncRun {
    pub run_id: RunId,
    pub repo_id: RepoId,
    pub job_type: PhysicalJobType,
    pub mode: SyncMode,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cursor_before: Cursor,
    pub cursor_after: Option<Cursor>,
    pub counts: RunCounts,
    pub error_summary: Option<ErrorSummary>,
    pub logbook_item_id: Option<String>,
}

impl SyncRun {
    pub fn start(
        run_id: RunId,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        mode: SyncMode,
        started_at: DateTime<Utc>,
        cursor_before: Cursor,
    ) -> Self {
        Self {
            run_id,
            repo_id,
            job_type,
            mode,
            status: SyncRunStatus::Running,
            started_at,
            finished_at: None,
            cursor_before,
            cursor_after: None,
            counts: RunCounts::new(),
            error_summary: None,
            logbook_item_id: None,
        }
    }

    /// Invariant: `finished_at` is set iff `status != running`, and a run
    /// may only be finalized once.
    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal() == self.finished_at.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncRunStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
    #[error("run {0} was already finalized")]
    AlreadyFinalized(RunId),
}

#[async_trait]
pub trait SyncRunStore: Send + Sync {
    async fn create(&self, run: &SyncRun) -> Result<(), SyncRunStoreError>;

    /// Exactly one finalization per `run_id`; a second
    /// call for an already-terminal run MUST return
    /// `SyncRunStoreError::AlreadyFinalized`.
    async fn finalize(
        &self,
        run_id: RunId,
        status: SyncRunStatus,
        finished_at: DateTime<Utc>,
        cursor_after: Option<Cursor>,
        counts: RunCounts,
        error_summary: Option<ErrorSummary>,
    ) -> Result<(), SyncRunStoreError>;

    async fn get(&self, run_id: RunId) -> Result<Option<SyncRun>, SyncRunStoreError>;

    /// Rows with `status = running` AND `started_at + max_duration_seconds
    /// < now` — used by the Reaper's second pass.
    async fn find_expired_running(
        &self,
        max_duration_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncRun>, SyncRunStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_run_is_not_finalized() {
        let run = SyncRun::start(
            RunId::new(),
            RepoId(1),
            PhysicalJobType::GitlabCommits,
            SyncMode::Incremental,
            Utc::now(),
            Cursor::Empty,
        );
        assert!(!run.is_finalized());
    }

    #[test]
    fn finalized_run_has_finished_at() {
        let mut run = SyncRun::start(
            RunId::new(),
            RepoId(1),
            PhysicalJobType::GitlabCommits,
            SyncMode::Incremental,
            Utc::now(),
            Cursor::Empty,
        );
        run.status = SyncRunStatus::Completed;
        run.finished_at = Some(Utc::now());
        assert!(run.is_finalized());
    }
}
