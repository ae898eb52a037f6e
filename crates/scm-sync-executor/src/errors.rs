//! The executor crate's own error type, wrapping every store error it can
//! surface from the ten-phase driver.

use scm_sync_core::{CircuitBreakerStoreError, CursorStoreError, LockError, QueueError, RepoStoreError, SyncRunStoreError};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("repo store: {0}")]
    Repo(#[from] RepoStoreError),
    #[error("lock manager: {0}")]
    Lock(#[from] LockError),
    #[error("cursor store: {0}")]
    Cursor(#[from] CursorStoreError),
    #[error("run store: {0}")]
    Run(#[from] SyncRunStoreError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error("circuit breaker store: {0}")]
    Circuit(#[from] CircuitBreakerStoreError),
    #[error("remote: {0}")]
    Remote(String),
}
