use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scm_sync_core::{Cursor, ErrorSummary, RunCounts, RunId, SyncRun, SyncRunStatus, SyncRunStore, SyncRunStoreError};

/// In-memory [`SyncRunStore`]; enforces the same exactly-once finalization
/// rule `PgSyncRunStore` enforces via `WHERE status = 'running'`.
#[derive(Default)]
pub struct FakeSyncRunStore {
    rows: Mutex<HashMap<RunId, SyncRun>>,
}

impl FakeSyncRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncRunStore for FakeSyncRunStore {
    async fn create(&self, run: &SyncRun) -> Result<(), SyncRunStoreError> {
        self.rows.lock().unwrap().insert(run.run_id, run.clone());
        Ok(())
    }

    async fn finalize(
        &self,
        run_id: RunId,
        status: SyncRunStatus,
        finished_at: DateTime<Utc>,
        cursor_after: Option<Cursor>,
        counts: RunCounts,
        error_summary: Option<ErrorSummary>,
    ) -> Result<(), SyncRunStoreError> {
        let mut rows = self.rows.lock().unwrap();
        let run = rows.get_mut(&run_id).ok_or(SyncRunStoreError::AlreadyFinalized(run_id))?;
        if run.status != SyncRunStatus::Running {
            return Err(SyncRunStoreError::AlreadyFinalized(run_id));
        }
        run.status = status;
        run.finished_at = Some(finished_at);
        run.cursor_after = cursor_after;
        run.counts = counts;
        run.error_summary = error_summary;
        Ok(())
    }

    async fn get(&self, run_id: RunId) -> Result<Option<SyncRun>, SyncRunStoreError> {
        Ok(self.rows.lock().unwrap().get(&run_id).cloned())
    }

    async fn find_expired_running(
        &self,
        max_duration_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncRun>, SyncRunStoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|run| {
                run.status == SyncRunStatus::Running
                    && (now - run.started_at).num_seconds() >= max_duration_seconds as i64
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scm_sync_core::{PhysicalJobType, RepoId, SyncMode};

    fn new_run(now: DateTime<Utc>) -> SyncRun {
        SyncRun::start(RunId::new(), RepoId(1), PhysicalJobType::Svn, SyncMode::Incremental, now, Cursor::Empty)
    }

    #[tokio::test]
    async fn second_finalize_is_rejected() {
        let store = FakeSyncRunStore::new();
        let now = Utc::now();
        let run = new_run(now);
        let run_id = run.run_id;
        store.create(&run).await.unwrap();

        store.finalize(run_id, SyncRunStatus::Completed, now, None, RunCounts::new(), None).await.unwrap();
        let result = store.finalize(run_id, SyncRunStatus::Completed, now, None, RunCounts::new(), None).await;
        assert!(matches!(result, Err(SyncRunStoreError::AlreadyFinalized(id)) if id == run_id));
    }

    #[tokio::test]
    async fn expired_running_runs_are_found() {
        let store = FakeSyncRunStore::new();
        let t0 = Utc::now();
        let run = new_run(t0);
        store.create(&run).await.unwrap();

        let later = t0 + chrono::Duration::seconds(3600);
        let expired = store.find_expired_running(1800, later).await.unwrap();
        assert_eq!(expired.len(), 1);
    }
}
