use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scm_sync_core::{LockError, LockInfo, PhysicalJobType, RepoId, SyncLockManager, WorkerId};

use crate::clock::VirtualClock;

/// In-memory [`SyncLockManager`]; the same compare-and-update semantics as
/// `PgSyncLockManager`, guarded by a single mutex rather than a row lock.
pub struct FakeSyncLockManager {
    rows: Mutex<HashMap<(RepoId, PhysicalJobType), LockInfo>>,
    clock: Arc<VirtualClock>,
}

impl FakeSyncLockManager {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self { rows: Mutex::new(HashMap::new()), clock }
    }
}

#[async_trait]
impl SyncLockManager for FakeSyncLockManager {
    async fn claim(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
        lease_seconds: u64,
    ) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let key = (repo_id, job_type);
        let claimable = match rows.get(&key) {
            None => true,
            Some(info) => info.is_free() || info.is_expired(now),
        };
        if !claimable {
            return Ok(false);
        }
        rows.insert(
            key,
            LockInfo {
                repo_id,
                job_type,
                locked_by: Some(worker_id.clone()),
                locked_at: Some(now),
                lease_seconds,
            },
        );
        Ok(true)
    }

    async fn renew(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
    ) -> Result<bool, LockError> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&(repo_id, job_type)) {
            Some(info) if info.locked_by.as_ref() == Some(worker_id) => {
                info.locked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
    ) -> Result<bool, LockError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&(repo_id, job_type)) {
            Some(info) if info.locked_by.as_ref() == Some(worker_id) => {
                info.locked_by = None;
                info.locked_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
    ) -> Result<Option<LockInfo>, LockError> {
        Ok(self.rows.lock().unwrap().get(&(repo_id, job_type)).cloned())
    }

    async fn force_release(&self, repo_id: RepoId, job_type: PhysicalJobType) -> Result<(), LockError> {
        if let Some(info) = self.rows.lock().unwrap().get_mut(&(repo_id, job_type)) {
            info.locked_by = None;
            info.locked_at = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn only_one_claimer_succeeds() {
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let manager = FakeSyncLockManager::new(clock);
        let repo_id = RepoId(1);
        let job_type = PhysicalJobType::GitlabCommits;
        let w1 = WorkerId("w1".into());
        let w2 = WorkerId("w2".into());
        assert!(manager.claim(repo_id, job_type, &w1, 60).await.unwrap());
        assert!(!manager.claim(repo_id, job_type, &w2, 60).await.unwrap());
    }

    #[tokio::test]
    async fn renew_fails_once_ownership_lost() {
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let manager = FakeSyncLockManager::new(clock);
        let repo_id = RepoId(1);
        let job_type = PhysicalJobType::Svn;
        let w1 = WorkerId("w1".into());
        let w2 = WorkerId("w2".into());
        manager.claim(repo_id, job_type, &w1, 60).await.unwrap();
        manager.force_release(repo_id, job_type).await.unwrap();
        manager.claim(repo_id, job_type, &w2, 60).await.unwrap();
        assert!(!manager.renew(repo_id, job_type, &w1).await.unwrap());
    }
}
