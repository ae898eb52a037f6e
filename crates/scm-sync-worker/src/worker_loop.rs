//! The worker loop itself: claim, run under a heartbeat, record the
//! circuit-breaker outcome, then ack/fail_retry/mark_dead by error
//! classification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use scm_sync_core::{
    pool::ClaimFilter, CircuitBreakerController, CircuitBreakerKey, CircuitBreakerStore, CircuitDecision, ErrorCategory,
    JobQueue, RepoStore, SyncOutcome, WorkerId,
};
use scm_sync_executor::{ExecutorDriver, ExecutorResultKind, RunJobRequest};
use tokio::time::Duration;

use crate::heartbeat::HeartbeatManager;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] scm_sync_core::QueueError),
    #[error("repo store error: {0}")]
    Repo(#[from] scm_sync_core::RepoStoreError),
}

/// Builds the stable per-scope circuit breaker key a worker process uses —
/// `<project_key>:pool:<name>` when a pool or allowlist narrows this
/// worker's claim filter, `<project_key>:global` otherwise. Keyed on
/// `pool_name`/allowlists rather than `worker_id` so restarts and
/// horizontally-scaled replicas of the same pool share one breaker.
pub fn build_worker_circuit_breaker_key(
    project_key: &str,
    pool_name: Option<&str>,
    instance_allowlist: &[String],
    tenant_allowlist: &[String],
) -> CircuitBreakerKey {
    if let Some(pool_name) = pool_name {
        return CircuitBreakerKey::pool(project_key, pool_name);
    }
    if let Some(first) = instance_allowlist.first() {
        let slug = first.replace('.', "-").replace(':', "-");
        return CircuitBreakerKey::pool(project_key, format!("instance-{slug}"));
    }
    if let Some(first) = tenant_allowlist.first() {
        return CircuitBreakerKey::pool(project_key, format!("tenant-{first}"));
    }
    CircuitBreakerKey::global(project_key)
}

/// Everything one worker process needs to claim, execute, and settle jobs.
pub struct WorkerRuntime {
    pub worker_id: WorkerId,
    pub queue: Arc<dyn JobQueue>,
    pub repos: Arc<dyn RepoStore>,
    pub circuits: Arc<dyn CircuitBreakerStore>,
    pub driver: Arc<ExecutorDriver>,
    pub breaker: CircuitBreakerController,
    pub breaker_key: CircuitBreakerKey,
    pub filter: ClaimFilter,
    pub lease_seconds: u64,
    pub renew_interval_seconds: u64,
    pub max_renew_failures: u32,
    pub poll_interval_seconds: u64,
    pub strict: bool,
    pub shutdown: Arc<AtomicBool>,
}

impl WorkerRuntime {
    async fn load_breaker_state(&self) -> scm_sync_core::CircuitBreakerState {
        match self.circuits.load(&self.breaker_key).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.breaker_key, "loading circuit breaker state failed, treating as closed");
                scm_sync_core::CircuitBreakerState::default()
            }
        }
    }

    async fn save_breaker_state(&self, state: &scm_sync_core::CircuitBreakerState) {
        if let Err(e) = self.circuits.save(&self.breaker_key, state).await {
            tracing::warn!(error = %e, key = %self.breaker_key, "saving circuit breaker state failed");
        }
    }

    /// Consulted once per poll before attempting a claim — if the breaker
    /// is open and not yet half-open, the caller waits instead of claiming.
    pub async fn circuit_gate(&self) -> CircuitDecision {
        let mut state = self.load_breaker_state().await;
        let now = Utc::now();
        self.breaker.maybe_enter_half_open(&mut state, now);
        let decision = self.breaker.check(&state, now);
        self.save_breaker_state(&state).await;
        decision
    }

    async fn record_outcome(&self, outcome: SyncOutcome) {
        let mut state = self.load_breaker_state().await;
        self.breaker.record_result(&mut state, outcome, Utc::now());
        self.save_breaker_state(&state).await;
    }

    /// Claims one job, runs it under a heartbeat, and settles it. Returns
    /// `Ok(JobOutcome::NoJob)` when there was nothing to claim.
    pub async fn process_one_job(&self) -> Result<JobOutcome, WorkerError> {
        let job = match self.queue.claim(&self.worker_id, self.lease_seconds, &self.filter).await? {
            Some(job) => job,
            None => return Ok(JobOutcome::NoJob),
        };
        let job_id = job.job_id;
        let job_type = job.job_type;
        tracing::info!(%job_id, job_type = %job.job_type, attempts = job.attempts, "claimed job");

        let repo = match self.repos.get(job.repo_id).await {
            Ok(Some(repo)) => repo,
            Ok(None) => {
                tracing::error!(%job_id, repo_id = %job.repo_id, "repo vanished after claim");
                let _ = self.queue.mark_dead(job_id, &self.worker_id, "repo not found for claimed job").await;
                return Ok(JobOutcome::Failed { job_type, category: ErrorCategory::RepoNotFound });
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "repo lookup failed");
                let _ = self.queue.fail_retry(job_id, &self.worker_id, &e.to_string(), 60).await;
                return Ok(JobOutcome::Failed { job_type, category: ErrorCategory::ServerError });
            }
        };

        let heartbeat = Arc::new(HeartbeatManager::new(
            job_id,
            self.worker_id.clone(),
            self.renew_interval_seconds,
            job.lease_seconds,
            self.max_renew_failures,
            self.queue.clone(),
        ));
        let hb_for_abort = heartbeat.clone();
        let should_abort = move || hb_for_abort.should_abort();

        let driver = self.driver.clone();
        let worker_id = self.worker_id.clone();
        let strict = self.strict;

        let result = heartbeat
            .clone()
            .run_under(move || async move {
                let req = RunJobRequest {
                    job: &job,
                    repo_type: repo.repo_type,
                    repo_url: &repo.url,
                    project_key: &repo.project_key,
                    default_branch: repo.default_branch.as_deref(),
                    worker_id: &worker_id,
                    lease_seconds: job.lease_seconds,
                    strict,
                    should_abort: &should_abort,
                };
                driver.run_job(req).await
            })
            .await;

        if self.shutdown.load(Ordering::SeqCst) {
            tracing::info!(%job_id, "shutdown requested, issuing final renewal before settling job");
            heartbeat.do_final_renew().await;
        }

        // `Locked` is excluded below before `outcome` is read: the ten-phase
        // driver only returns it when the sync lock itself is contended, not
        // the queue lease, so it must not count toward the circuit breaker.
        if let Some(outcome) = match &result.kind {
            ExecutorResultKind::Ok => Some(SyncOutcome::Success),
            ExecutorResultKind::Locked => None,
            ExecutorResultKind::LeaseLost => Some(SyncOutcome::Failure(ErrorCategory::LeaseLost)),
            ExecutorResultKind::Failed { category, .. } => Some(SyncOutcome::Failure(*category)),
        } {
            self.record_outcome(outcome).await;
        }

        match result.kind {
            ExecutorResultKind::Ok | ExecutorResultKind::Locked => {
                let _ = self.queue.ack(job_id, &self.worker_id).await;
                tracing::info!(%job_id, "job completed");
                Ok(JobOutcome::Success { job_type })
            }
            ExecutorResultKind::LeaseLost => {
                let _ = self
                    .queue
                    .fail_retry(job_id, &self.worker_id, "heartbeat lease lost mid-run", ErrorCategory::LeaseLost.base_backoff_seconds())
                    .await;
                tracing::warn!(%job_id, "job aborted: lease lost");
                Ok(JobOutcome::Failed { job_type, category: ErrorCategory::LeaseLost })
            }
            ExecutorResultKind::Failed { category, detail } => {
                let redacted = scm_sync_core::redact(&detail);
                if category.is_permanent() {
                    let _ = self.queue.mark_dead(job_id, &self.worker_id, &redacted).await;
                    tracing::warn!(%job_id, %category, error = %redacted, "job failed permanently, marked dead");
                } else {
                    let (backoff, _source) = scm_sync_core::resolve_backoff(None, Some(category), Some(&redacted));
                    let _ = self.queue.fail_retry(job_id, &self.worker_id, &redacted, backoff).await;
                    tracing::warn!(%job_id, %category, backoff, error = %redacted, "job failed, scheduled for retry");
                }
                Ok(JobOutcome::Failed { job_type, category })
            }
        }
    }

    /// Process exactly one job then return (`--once`).
    pub async fn run_once(&self) -> JobOutcome {
        match self.process_one_job().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "worker loop iteration errored");
                JobOutcome::Errored
            }
        }
    }

    /// Poll until the shutdown flag is set (`--loop`, the default).
    pub async fn run_loop(&self) {
        tracing::info!(
            worker_id = %self.worker_id,
            key = %self.breaker_key,
            poll_interval = self.poll_interval_seconds,
            lease_seconds = self.lease_seconds,
            "worker loop starting"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            let decision = self.circuit_gate().await;
            if !decision.allow_sync {
                let wait = decision.wait_seconds.min(self.poll_interval_seconds as f64).max(0.0);
                tracing::info!(wait_seconds = wait, "circuit breaker open, waiting before next attempt");
                sleep_interruptible(&self.shutdown, Duration::from_secs_f64(wait)).await;
                continue;
            }

            let outcome = self.run_once().await;
            if matches!(outcome, JobOutcome::NoJob) {
                sleep_interruptible(&self.shutdown, Duration::from_secs(self.poll_interval_seconds)).await;
            } else if self.shutdown.load(Ordering::SeqCst) {
                tracing::info!("shutdown requested after completing a job, no longer claiming new work");
                break;
            }
        }

        tracing::info!("worker loop stopped");
    }
}

/// What one pass through [`WorkerRuntime::process_one_job`] produced, coarse
/// enough for a `--once` caller to compute a process exit code from.
#[derive(Debug, Clone, Copy)]
pub enum JobOutcome {
    /// Nothing was available to claim.
    NoJob,
    Success { job_type: scm_sync_core::PhysicalJobType },
    Failed { job_type: scm_sync_core::PhysicalJobType, category: ErrorCategory },
    /// The loop iteration itself errored (e.g. a queue connection failure),
    /// independent of any particular job.
    Errored,
}

/// Sleeps in 1-second slices so a shutdown request is noticed promptly
/// instead of only after a full `poll_interval`.
async fn sleep_interruptible(shutdown: &AtomicBool, total: Duration) {
    let mut remaining = total;
    let slice = Duration::from_secs(1);
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scm_sync_core::CircuitBreakerKey;

    #[test]
    fn pool_name_wins_over_allowlists() {
        let key = build_worker_circuit_breaker_key("proj", Some("fast"), &["gitlab.example.com".to_string()], &[]);
        assert_eq!(key, CircuitBreakerKey::pool("proj", "fast"));
    }

    #[test]
    fn instance_allowlist_derives_a_pool_name() {
        let key = build_worker_circuit_breaker_key("proj", None, &["gitlab.example.com:8443".to_string()], &[]);
        assert_eq!(key, CircuitBreakerKey::pool("proj", "instance-gitlab-example-com-8443"));
    }

    #[test]
    fn tenant_allowlist_derives_a_pool_name() {
        let key = build_worker_circuit_breaker_key("proj", None, &[], &["tenant-a".to_string()]);
        assert_eq!(key, CircuitBreakerKey::pool("proj", "tenant-tenant-a"));
    }

    #[test]
    fn no_scoping_falls_back_to_global() {
        let key = build_worker_circuit_breaker_key("proj", None, &[], &[]);
        assert_eq!(key, CircuitBreakerKey::global("proj"));
    }
}
