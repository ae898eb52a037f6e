//! Data model, trait boundaries, error taxonomy, and pure helper functions
//! shared by every other crate in the workspace. No IO lives here — every
//! `*Store`/`*Manager`/`JobQueue` trait is implemented against Postgres in
//! `scm-sync-postgres` and faked in-memory in `scm-sync-testing`.

pub mod circuit;
pub mod cursor;
pub mod errors;
pub mod event_mapping;
pub mod ids;
pub mod lock;
pub mod queue;
pub mod repo;
pub mod run;
pub mod source_id;

pub use circuit::{
    BreakerState, CircuitBreakerController, CircuitBreakerKey, CircuitBreakerState,
    CircuitBreakerStore, CircuitBreakerStoreError, CircuitDecision, SyncOutcome,
};
pub use cursor::{Cursor, CursorEnvelope, CursorStats, CursorStore, CursorStoreError, should_advance};
pub use errors::{
    BackoffSource, ErrorCategory, calculate_backoff_seconds, classify_last_error, classify_message,
    redact, resolve_backoff,
};
pub use event_mapping::{RemoteNote, ReviewEventType, classify_note};
pub use ids::{
    JobId, JobType, LockId, LogicalJobType, PhysicalJobType, RepoId, RepoType, RunId, SyncMode,
    WorkerId,
};
pub use lock::{LockError, LockInfo, SyncLockManager};
pub use queue::{JobPayload, JobQueue, JobStatus, QueueError, SyncJob, pool};
pub use repo::{RepoInfo, RepoStore, RepoStoreError, normalize_repo_url};
pub use run::{ErrorSummary, RunCounts, SyncRun, SyncRunStatus, SyncRunStore, SyncRunStoreError};
pub use source_id::{
    ReviewSourceKind, build_approval_source_event_id, build_git_commit_source_id, build_mr_id,
    build_mr_source_id, build_review_source_event_id, build_svn_revision_source_id,
};
