//! Heartbeat Manager: a background `tokio` task renewing the job lease on
//! a timer. Tracks consecutive `renew_lease` failures and flips
//! `should_abort` once `max_failures` is reached, which the executor
//! checks at its documented safe points.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use scm_sync_core::{JobId, JobQueue, WorkerId};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Duration;

struct HeartbeatState {
    failure_count: AtomicU32,
    should_abort: AtomicBool,
}

pub struct HeartbeatManager {
    job_id: JobId,
    worker_id: WorkerId,
    renew_interval: Duration,
    lease_seconds: u64,
    max_failures: u32,
    queue: Arc<dyn JobQueue>,
    state: Arc<HeartbeatState>,
    stop: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatManager {
    pub fn new(
        job_id: JobId,
        worker_id: WorkerId,
        renew_interval_seconds: u64,
        lease_seconds: u64,
        max_failures: u32,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            job_id,
            worker_id,
            renew_interval: Duration::from_secs(renew_interval_seconds.max(1)),
            lease_seconds,
            max_failures,
            queue,
            state: Arc::new(HeartbeatState { failure_count: AtomicU32::new(0), should_abort: AtomicBool::new(false) }),
            stop: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    pub fn should_abort(&self) -> bool {
        self.state.should_abort.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u32 {
        self.state.failure_count.load(Ordering::SeqCst)
    }

    /// Starts the background renewal task if it isn't already running.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        let job_id = self.job_id;
        let worker_id = self.worker_id.clone();
        let queue = self.queue.clone();
        let state = self.state.clone();
        let stop = self.stop.clone();
        let renew_interval = self.renew_interval;
        let lease_seconds = self.lease_seconds;
        let max_failures = self.max_failures;

        *handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = tokio::time::sleep(renew_interval) => {}
                }

                let success = do_renew(&queue, job_id, &worker_id, lease_seconds).await;
                if success {
                    state.failure_count.store(0, Ordering::SeqCst);
                } else {
                    let failures = state.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(%job_id, failures, max_failures, "lease renewal failed");
                    if failures >= max_failures {
                        state.should_abort.store(true, Ordering::SeqCst);
                        tracing::error!(%job_id, failures, "lease renewal exhausted, marking run for abort");
                        break;
                    }
                }
            }
        }));
        tracing::debug!(job_id = %self.job_id, interval_secs = self.renew_interval.as_secs(), "heartbeat started");
    }

    /// Stops the background task, waiting for it to exit.
    pub async fn stop(&self) {
        self.stop.notify_waiters();
        let mut handle = self.handle.lock().await;
        if let Some(task) = handle.take() {
            let _ = task.await;
        }
        tracing::debug!(job_id = %self.job_id, "heartbeat stopped");
    }

    /// A single renewal issued outside the periodic loop, used on graceful
    /// shutdown to make sure the lease reflects the latest known-good state.
    pub async fn do_final_renew(&self) -> bool {
        do_renew(&self.queue, self.job_id, &self.worker_id, self.lease_seconds).await
    }

    /// Runs `body` with the heartbeat started and registered as the
    /// process-wide "current" heartbeat for the signal handler, then stops
    /// and clears it on the way out, success or failure.
    pub async fn run_under<F, Fut, T>(self: Arc<Self>, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.start().await;
        register_current(self.clone()).await;
        let result = body().await;
        clear_current().await;
        self.stop().await;
        result
    }
}

async fn do_renew(queue: &Arc<dyn JobQueue>, job_id: JobId, worker_id: &WorkerId, lease_seconds: u64) -> bool {
    match queue.renew_lease(job_id, worker_id, lease_seconds).await {
        Ok(true) => {
            tracing::debug!(%job_id, "lease renewed");
            true
        }
        Ok(false) => {
            tracing::warn!(%job_id, "lease renewal returned false, job may have been reclaimed");
            false
        }
        Err(e) => {
            tracing::error!(%job_id, error = %e, "lease renewal errored");
            false
        }
    }
}

/// The process-global "currently executing" heartbeat, so the SIGINT/SIGTERM
/// handler can issue a final renewal before the worker loop finishes
/// unwinding. A `OnceLock<Mutex<...>>` guarded slot rather than a bare
/// mutable global.
static CURRENT_HEARTBEAT: OnceLock<Mutex<Option<Arc<HeartbeatManager>>>> = OnceLock::new();

fn current_slot() -> &'static Mutex<Option<Arc<HeartbeatManager>>> {
    CURRENT_HEARTBEAT.get_or_init(|| Mutex::new(None))
}

async fn register_current(manager: Arc<HeartbeatManager>) {
    *current_slot().lock().await = Some(manager);
}

async fn clear_current() {
    *current_slot().lock().await = None;
}

/// Called from the signal handler: renews the lease for whichever job is
/// currently in flight, if any.
pub async fn final_renew_current() {
    let guard = current_slot().lock().await;
    if let Some(manager) = guard.as_ref() {
        tracing::info!("issuing final lease renewal before shutdown");
        if !manager.do_final_renew().await {
            tracing::warn!("final lease renewal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scm_sync_testing::FakeWorld;

    #[tokio::test]
    async fn successful_renewals_keep_failure_count_at_zero() {
        let world = FakeWorld::new();
        let job = scm_sync_testing::new_job(
            scm_sync_core::RepoId(1),
            scm_sync_core::PhysicalJobType::GitlabCommits,
            scm_sync_core::SyncMode::Incremental,
            world.clock.now(),
        );
        let job_id = job.job_id;
        let worker_id = WorkerId("w1".to_string());
        world.queue.insert(job);
        world.queue.claim(&worker_id, 60, &scm_sync_core::pool::ClaimFilter::default()).await.unwrap();

        let manager = Arc::new(HeartbeatManager::new(job_id, worker_id, 1, 60, 3, world.queue.clone()));
        manager.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.stop().await;
        assert_eq!(manager.failure_count(), 0);
        assert!(!manager.should_abort());
    }

    #[tokio::test]
    async fn do_final_renew_reports_success() {
        let world = FakeWorld::new();
        let job = scm_sync_testing::new_job(
            scm_sync_core::RepoId(2),
            scm_sync_core::PhysicalJobType::Svn,
            scm_sync_core::SyncMode::Incremental,
            world.clock.now(),
        );
        let job_id = job.job_id;
        let worker_id = WorkerId("w2".to_string());
        world.queue.insert(job);
        world.queue.claim(&worker_id, 60, &scm_sync_core::pool::ClaimFilter::default()).await.unwrap();

        let manager = HeartbeatManager::new(job_id, worker_id, 60, 60, 3, world.queue.clone());
        assert!(manager.do_final_renew().await);
    }

    #[tokio::test]
    async fn renewal_failures_past_threshold_set_should_abort() {
        let world = FakeWorld::new();
        let worker_id = WorkerId("ghost".to_string());
        // No job claimed by this worker_id, so every renew_lease call
        // returns Ok(false) — the lease-lost path, not a store error.
        let manager = Arc::new(HeartbeatManager::new(
            scm_sync_core::JobId(uuid::Uuid::new_v4()),
            worker_id,
            1,
            60,
            2,
            world.queue.clone(),
        ));
        manager.start().await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        manager.stop().await;
        assert!(manager.should_abort());
        assert!(manager.failure_count() >= 2);
    }
}
