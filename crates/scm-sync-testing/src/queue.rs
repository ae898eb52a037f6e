use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use scm_sync_core::errors::redact;
use scm_sync_core::queue::pool::ClaimFilter;
use scm_sync_core::{JobId, JobQueue, JobStatus, QueueError, SyncJob, WorkerId};
use uuid::Uuid;

use crate::clock::VirtualClock;

/// In-memory [`JobQueue`]; single-mutex stand-in for `PgJobQueue`'s `FOR
/// UPDATE SKIP LOCKED` claim — good enough for unit tests that never race
/// two real OS threads against the same `Mutex`.
pub struct FakeJobQueue {
    rows: Mutex<HashMap<JobId, SyncJob>>,
    clock: Arc<VirtualClock>,
}

impl FakeJobQueue {
    pub fn new(clock: Arc<VirtualClock>) -> Self {
        Self { rows: Mutex::new(HashMap::new()), clock }
    }

    /// Seed a job directly, bypassing `claim`'s state machine — the fake's
    /// equivalent of an `INSERT` by a job producer.
    pub fn insert(&self, job: SyncJob) {
        self.rows.lock().unwrap().insert(job.job_id, job);
    }

    pub fn get(&self, job_id: JobId) -> Option<SyncJob> {
        self.rows.lock().unwrap().get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for FakeJobQueue {
    async fn claim(
        &self,
        worker_id: &WorkerId,
        lease_seconds: u64,
        filter: &ClaimFilter,
    ) -> Result<Option<SyncJob>, QueueError> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();

        let mut candidates: Vec<&mut SyncJob> = rows
            .values_mut()
            .filter(|job| {
                let eligible = match job.status {
                    JobStatus::Pending => job.not_before.map(|nb| nb <= now).unwrap_or(true),
                    JobStatus::Running => {
                        job.locked_at
                            .map(|locked_at| (now - locked_at).num_seconds() >= job.lease_seconds as i64)
                            .unwrap_or(true)
                    }
                    _ => false,
                };
                eligible && filter.matches(job.job_type, None, job.payload.tenant_id.as_deref())
            })
            .collect();

        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));

        let Some(job) = candidates.into_iter().next() else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.locked_by = Some(worker_id.clone());
        job.locked_at = Some(now);
        job.lease_seconds = lease_seconds;
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn ack(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, QueueError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(job) = rows.get_mut(&job_id) else { return Ok(false) };
        if job.locked_by.as_ref() != Some(worker_id) {
            return Ok(false);
        }
        job.status = JobStatus::Completed;
        job.updated_at = self.clock.now();
        Ok(true)
    }

    async fn fail_retry(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
        backoff_seconds: u64,
    ) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let Some(job) = rows.get_mut(&job_id) else { return Ok(false) };
        if job.locked_by.as_ref() != Some(worker_id) {
            return Ok(false);
        }
        job.last_error = Some(redact(error));
        job.updated_at = now;
        if job.attempts >= job.max_attempts {
            job.status = JobStatus::Dead;
            job.locked_by = None;
            job.locked_at = None;
        } else {
            job.status = JobStatus::Failed;
            job.not_before = Some(now + Duration::seconds(backoff_seconds as i64));
            job.locked_by = None;
            job.locked_at = None;
        }
        Ok(true)
    }

    async fn mark_dead(&self, job_id: JobId, worker_id: &WorkerId, error: &str) -> Result<bool, QueueError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(job) = rows.get_mut(&job_id) else { return Ok(false) };
        if job.locked_by.as_ref() != Some(worker_id) {
            return Ok(false);
        }
        job.status = JobStatus::Dead;
        job.last_error = Some(redact(error));
        job.locked_by = None;
        job.locked_at = None;
        job.updated_at = self.clock.now();
        Ok(true)
    }

    async fn renew_lease(&self, job_id: JobId, worker_id: &WorkerId, lease_seconds: u64) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut rows = self.rows.lock().unwrap();
        let Some(job) = rows.get_mut(&job_id) else { return Ok(false) };
        if job.locked_by.as_ref() != Some(worker_id) || job.status != JobStatus::Running {
            return Ok(false);
        }
        job.locked_at = Some(now);
        job.lease_seconds = lease_seconds;
        job.updated_at = now;
        Ok(true)
    }

    async fn requeue_without_penalty(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, QueueError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(job) = rows.get_mut(&job_id) else { return Ok(false) };
        if job.locked_by.as_ref() != Some(worker_id) {
            return Ok(false);
        }
        job.status = JobStatus::Pending;
        job.locked_by = None;
        job.locked_at = None;
        job.updated_at = self.clock.now();
        Ok(true)
    }
}

/// Builds a fresh `pending` job with sane defaults, for seeding a
/// [`FakeJobQueue`] in tests.
pub fn new_job(
    repo_id: scm_sync_core::RepoId,
    job_type: scm_sync_core::PhysicalJobType,
    mode: scm_sync_core::SyncMode,
    now: chrono::DateTime<chrono::Utc>,
) -> SyncJob {
    SyncJob {
        job_id: JobId(Uuid::new_v4()),
        repo_id,
        job_type,
        mode,
        priority: 100,
        status: JobStatus::Pending,
        attempts: 0,
        max_attempts: 5,
        locked_by: None,
        locked_at: None,
        lease_seconds: 300,
        not_before: None,
        last_error: None,
        payload: Default::default(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scm_sync_core::{PhysicalJobType, RepoId, SyncMode};

    #[tokio::test]
    async fn claim_ack_roundtrip() {
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let queue = FakeJobQueue::new(clock.clone());
        let job = new_job(RepoId(1), PhysicalJobType::Svn, SyncMode::Incremental, clock.now());
        let job_id = job.job_id;
        queue.insert(job);

        let worker = WorkerId("w1".into());
        let claimed = queue.claim(&worker, 60, &ClaimFilter::default()).await.unwrap().unwrap();
        assert_eq!(claimed.job_id, job_id);
        assert_eq!(claimed.attempts, 1);

        assert!(queue.ack(job_id, &worker).await.unwrap());
        assert_eq!(queue.get(job_id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn ack_without_lease_is_a_noop() {
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let queue = FakeJobQueue::new(clock.clone());
        let job = new_job(RepoId(1), PhysicalJobType::Svn, SyncMode::Incremental, clock.now());
        let job_id = job.job_id;
        queue.insert(job);

        let impostor = WorkerId("impostor".into());
        assert!(!queue.ack(job_id, &impostor).await.unwrap());
        assert_eq!(queue.get(job_id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn fail_retry_promotes_to_dead_at_max_attempts() {
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let queue = FakeJobQueue::new(clock.clone());
        let mut job = new_job(RepoId(1), PhysicalJobType::Svn, SyncMode::Incremental, clock.now());
        job.max_attempts = 1;
        let job_id = job.job_id;
        queue.insert(job);

        let worker = WorkerId("w1".into());
        queue.claim(&worker, 60, &ClaimFilter::default()).await.unwrap().unwrap();
        queue.fail_retry(job_id, &worker, "boom", 30).await.unwrap();
        assert_eq!(queue.get(job_id).unwrap().status, JobStatus::Dead);
    }
}
