//! The distributed per-`(repo_id, job_type)` sync lock,
//! distinct from a job's own queue lease: this protects the semantic
//! repository resource, not the queue row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ids::{PhysicalJobType, RepoId, WorkerId};

#[derive(Debug, Clone, PartialEq)]
pub struct LockInfo {
    pub repo_id: RepoId,
    pub job_type: PhysicalJobType,
    pub locked_by: Option<WorkerId>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lease_seconds: u64,
}

impl LockInfo {
    pub fn is_free(&self) -> bool {
        self.locked_by.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.locked_at {
            None => true,
            Some(locked_at) => (now - locked_at).num_seconds() >= self.lease_seconds as i64,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Per-`(repo_id, job_type)` mutual exclusion with lease expiry
///. Every mutating method must be an atomic row-level
/// compare-and-update against `locked_by`.
#[async_trait]
pub trait SyncLockManager: Send + Sync {
    /// Acquires the lock iff currently free OR its lease has expired.
    async fn claim(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
        lease_seconds: u64,
    ) -> Result<bool, LockError>;

    /// Extends the lease iff `locked_by == worker_id`; `false` means
    /// ownership has been lost and the caller MUST abort.
    async fn renew(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
    ) -> Result<bool, LockError>;

    /// Clears the lock iff `locked_by == worker_id`.
    async fn release(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
    ) -> Result<bool, LockError>;

    /// Best-effort read for diagnostics; does not mutate.
    async fn get(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
    ) -> Result<Option<LockInfo>, LockError>;

    /// Admin/reaper-only: clears the lock unconditionally.
    async fn force_release(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
    ) -> Result<(), LockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_lock_is_expired_for_any_now() {
        let info = LockInfo {
            repo_id: RepoId(1),
            job_type: PhysicalJobType::GitlabCommits,
            locked_by: None,
            locked_at: None,
            lease_seconds: 60,
        };
        assert!(info.is_free());
        assert!(info.is_expired(Utc::now()));
    }

    #[test]
    fn held_lock_expires_after_lease_seconds() {
        let now = Utc::now();
        let info = LockInfo {
            repo_id: RepoId(1),
            job_type: PhysicalJobType::GitlabCommits,
            locked_by: Some(WorkerId("w1".into())),
            locked_at: Some(now - chrono::Duration::seconds(61)),
            lease_seconds: 60,
        };
        assert!(!info.is_free());
        assert!(info.is_expired(now));
    }

    #[test]
    fn held_lock_within_lease_is_not_expired() {
        let now = Utc::now();
        let info = LockInfo {
            repo_id: RepoId(1),
            job_type: PhysicalJobType::GitlabCommits,
            locked_by: Some(WorkerId("w1".into())),
            locked_at: Some(now - chrono::Duration::seconds(5)),
            lease_seconds: 60,
        };
        assert!(!info.is_expired(now));
    }
}
