//! PostgreSQL implementations of every store trait in `scm-sync-core`, plus
//! the Reaper.
//!
//! # Database schema
//!
//! Only the columns the engine itself reads or writes are shown; DDL
//! migrations are out of scope for this crate — this is the
//! contract callers must provide.
//!
//! ```sql
//! CREATE TABLE repos (
//!     repo_id BIGSERIAL PRIMARY KEY,
//!     repo_type TEXT NOT NULL,
//!     url TEXT NOT NULL,
//!     project_key TEXT NOT NULL,
//!     default_branch TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     UNIQUE (repo_type, url)
//! );
//!
//! CREATE TABLE sync_jobs (
//!     job_id UUID PRIMARY KEY,
//!     repo_id BIGINT NOT NULL REFERENCES repos (repo_id),
//!     job_type TEXT NOT NULL,
//!     mode TEXT NOT NULL,
//!     priority INTEGER NOT NULL DEFAULT 100,
//!     status TEXT NOT NULL DEFAULT 'pending',
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     max_attempts INTEGER NOT NULL DEFAULT 5,
//!     locked_by TEXT,
//!     locked_at TIMESTAMPTZ,
//!     lease_seconds BIGINT NOT NULL DEFAULT 300,
//!     not_before TIMESTAMPTZ,
//!     last_error TEXT,
//!     payload JSONB NOT NULL DEFAULT '{}',
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE INDEX sync_jobs_claim_idx ON sync_jobs (status, priority, created_at);
//! CREATE INDEX sync_jobs_repo_type_idx ON sync_jobs (repo_id, job_type);
//!
//! CREATE TABLE sync_locks (
//!     lock_id BIGSERIAL PRIMARY KEY,
//!     repo_id BIGINT NOT NULL REFERENCES repos (repo_id),
//!     job_type TEXT NOT NULL,
//!     locked_by TEXT,
//!     locked_at TIMESTAMPTZ,
//!     lease_seconds BIGINT NOT NULL DEFAULT 120,
//!     UNIQUE (repo_id, job_type)
//! );
//!
//! CREATE TABLE sync_runs (
//!     run_id UUID PRIMARY KEY,
//!     repo_id BIGINT NOT NULL REFERENCES repos (repo_id),
//!     job_type TEXT NOT NULL,
//!     mode TEXT NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'running',
//!     started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     finished_at TIMESTAMPTZ,
//!     cursor_before JSONB,
//!     cursor_after JSONB,
//!     counts JSONB NOT NULL DEFAULT '{}',
//!     error_summary JSONB,
//!     logbook_item_id TEXT
//! );
//!
//! CREATE TABLE sync_cursors (
//!     repo_id BIGINT NOT NULL REFERENCES repos (repo_id),
//!     job_type TEXT NOT NULL,
//!     cursor JSONB NOT NULL,
//!     PRIMARY KEY (repo_id, job_type)
//! );
//!
//! CREATE TABLE circuit_breaker_state (
//!     scope_key TEXT PRIMARY KEY,
//!     state JSONB NOT NULL
//! );
//! ```

mod circuit;
mod cursor;
mod lock;
mod queue;
mod reaper;
mod repo;
mod run;

pub use circuit::PgCircuitBreakerStore;
pub use cursor::PgCursorStore;
pub use lock::PgSyncLockManager;
pub use queue::PgJobQueue;
pub use reaper::{JobRecoveryPolicy, ReaperConfig, ReaperReport, Reaper};
pub use repo::PgRepoStore;
pub use run::PgSyncRunStore;
