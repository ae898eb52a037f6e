//! In-memory fakes of every `scm-sync-core` store trait, sharing a single
//! [`VirtualClock`] so executor and worker tests can exercise lease expiry,
//! backoff scheduling, and monotone cursor advancement without a live
//! Postgres instance or real sleeps.

pub mod circuit;
pub mod clock;
pub mod cursor;
pub mod lock;
pub mod queue;
pub mod repo;
pub mod run;

pub use circuit::FakeCircuitBreakerStore;
pub use clock::VirtualClock;
pub use cursor::FakeCursorStore;
pub use lock::FakeSyncLockManager;
pub use queue::{FakeJobQueue, new_job};
pub use repo::FakeRepoStore;
pub use run::FakeSyncRunStore;

use std::sync::Arc;

use chrono::Utc;

/// A complete set of fakes sharing one clock, for wiring up an executor or
/// worker under test in a single call.
pub struct FakeWorld {
    pub clock: Arc<VirtualClock>,
    pub repos: Arc<FakeRepoStore>,
    pub cursors: Arc<FakeCursorStore>,
    pub locks: Arc<FakeSyncLockManager>,
    pub queue: Arc<FakeJobQueue>,
    pub runs: Arc<FakeSyncRunStore>,
    pub circuits: Arc<FakeCircuitBreakerStore>,
}

impl FakeWorld {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: chrono::DateTime<Utc>) -> Self {
        let clock = Arc::new(VirtualClock::new(now));
        Self {
            repos: Arc::new(FakeRepoStore::new(clock.clone())),
            cursors: Arc::new(FakeCursorStore::new()),
            locks: Arc::new(FakeSyncLockManager::new(clock.clone())),
            queue: Arc::new(FakeJobQueue::new(clock.clone())),
            runs: Arc::new(FakeSyncRunStore::new()),
            circuits: Arc::new(FakeCircuitBreakerStore::new()),
            clock,
        }
    }
}

impl Default for FakeWorld {
    fn default() -> Self {
        Self::new()
    }
}
