//! Background recovery for work abandoned by a dead or partitioned worker.
//! Three independent passes — expired running jobs, expired running runs,
//! expired locks — each idempotent and tolerant of individual row failures
//! (a single bad row increments `errors` and the pass moves on), built as
//! direct `sqlx` queries over the same tables the rest of this crate
//! already owns.

use chrono::Utc;
use scm_sync_core::errors::{
    calculate_backoff_seconds, classify_last_error, redact, DEFAULT_BACKOFF_BASE,
    DEFAULT_MAX_REAPER_BACKOFF_SECONDS,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

/// What to do with a running job whose lease expired but whose `last_error`
/// doesn't classify as permanent or transient (i.e. it just timed out with no
/// prior failure on record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum JobRecoveryPolicy {
    /// Default: treat the expired lease itself as a failure and go through
    /// the normal retry/backoff path.
    ToFailed,
    /// Put the job straight back on the queue with no penalty. Useful for
    /// pools where lease expiry is expected (e.g. worker restarts) rather
    /// than evidence of a broken job.
    ToPending,
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub policy: JobRecoveryPolicy,
    pub retry_delay_seconds: u64,
    pub transient_retry_delay_multiplier: f64,
    pub max_reaper_backoff_seconds: u64,
    /// Max age (from `started_at`) before a `running` `sync_runs` row is
    /// considered abandoned.
    pub run_max_duration_seconds: u64,
    /// Extra slack added on top of `lease_seconds` before a `running` job or
    /// held lock is considered abandoned, so a worker that is merely slow to
    /// renew (GC pause, brief network blip) isn't reaped out from under
    /// itself the instant its lease ticks over.
    pub grace_seconds: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            policy: JobRecoveryPolicy::ToFailed,
            retry_delay_seconds: DEFAULT_BACKOFF_BASE,
            transient_retry_delay_multiplier: 1.0,
            max_reaper_backoff_seconds: DEFAULT_MAX_REAPER_BACKOFF_SECONDS,
            run_max_duration_seconds: 3600,
            grace_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassStats {
    pub processed: u64,
    pub to_failed: u64,
    pub to_dead: u64,
    pub to_pending: u64,
    pub released: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReaperReport {
    pub jobs: PassStats,
    pub runs: PassStats,
    pub locks: PassStats,
}

struct ExpiredJobRow {
    job_id: uuid::Uuid,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
}

/// Sweeps `sync_jobs`, `sync_runs`, and `sync_locks` for work abandoned by a
/// worker that died (or was partitioned away) mid-lease.
#[derive(Clone)]
pub struct Reaper {
    pool: PgPool,
}

impl Reaper {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all three passes and returns a combined report. Each pass commits
    /// its own row-level work independently, so a failure in one pass never
    /// rolls back another.
    pub async fn run_once(&self, config: &ReaperConfig) -> ReaperReport {
        ReaperReport {
            jobs: self.reap_expired_jobs(config).await,
            runs: self.reap_expired_runs(config).await,
            locks: self.reap_expired_locks(config).await,
        }
    }

    fn format_error(prefix: &str, category: Option<&str>, last_error: Option<&str>) -> String {
        let mut message = prefix.to_string();
        if let Some(category) = category {
            message = format!("{message} ({category})");
        }
        if let Some(last_error) = last_error {
            if !last_error.is_empty() {
                message = format!("{message}: {last_error}");
            }
        }
        redact(&message)
    }

    async fn mark_dead_by_reaper(&self, job_id: uuid::Uuid, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'dead', last_error = $1, locked_by = NULL, locked_at = NULL, updated_at = NOW() WHERE job_id = $2 AND status = 'running'",
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed_by_reaper(
        &self,
        job_id: uuid::Uuid,
        error: &str,
        backoff_seconds: u64,
    ) -> Result<bool, sqlx::Error> {
        let not_before = Utc::now() + chrono::Duration::seconds(backoff_seconds as i64);
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'failed', last_error = $1, not_before = $2, locked_by = NULL, locked_at = NULL, updated_at = NOW() WHERE job_id = $3 AND status = 'running'",
        )
        .bind(error)
        .bind(not_before)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_pending_by_reaper(&self, job_id: uuid::Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'pending', locked_by = NULL, locked_at = NULL, updated_at = NOW() WHERE job_id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Pass 1: `running` jobs whose lease has expired. Classifies the job's
    /// last recorded error the same way the Worker Loop would, so a job that
    /// died mid-auth-failure goes straight to `dead` instead of being retried
    /// forever.
    async fn reap_expired_jobs(&self, config: &ReaperConfig) -> PassStats {
        let mut stats = PassStats::default();

        let rows = match sqlx::query(
            "SELECT job_id, attempts, max_attempts, last_error FROM sync_jobs WHERE status = 'running' AND locked_at + ((lease_seconds + $1) || ' seconds')::interval < NOW()",
        )
        .bind(config.grace_seconds as i64)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "reaper: failed to list expired running jobs");
                stats.errors += 1;
                return stats;
            }
        };

        let expired: Vec<ExpiredJobRow> = rows
            .iter()
            .map(|row| ExpiredJobRow {
                job_id: row.get("job_id"),
                attempts: row.get("attempts"),
                max_attempts: row.get("max_attempts"),
                last_error: row.get("last_error"),
            })
            .collect();

        for job in expired {
            stats.processed += 1;
            let (is_permanent, is_transient, category) =
                classify_last_error(job.last_error.as_deref());

            let outcome = if is_permanent {
                let message = Self::format_error(
                    "Reaped: permanent error",
                    category.map(|c| c.as_str()),
                    job.last_error.as_deref(),
                );
                self.mark_dead_by_reaper(job.job_id, &message).await.map(|ok| (ok, true))
            } else if is_transient {
                let attempts = (job.attempts as i64) + 1;
                let base = if config.retry_delay_seconds == 0 {
                    DEFAULT_BACKOFF_BASE
                } else {
                    config.retry_delay_seconds
                };
                let mut backoff = calculate_backoff_seconds(
                    attempts,
                    base,
                    config.max_reaper_backoff_seconds,
                    category,
                    job.last_error.as_deref(),
                );
                if config.transient_retry_delay_multiplier != 1.0 {
                    backoff = ((backoff as f64) * config.transient_retry_delay_multiplier) as u64;
                }
                let message = Self::format_error(
                    "Reaped: transient error",
                    category.map(|c| c.as_str()),
                    job.last_error.as_deref(),
                );
                self.mark_failed_by_reaper(job.job_id, &message, backoff).await.map(|ok| (ok, false))
            } else if job.max_attempts > 0 && job.attempts >= job.max_attempts {
                let message = Self::format_error(
                    "Reaped: job expired after max attempts",
                    None,
                    job.last_error.as_deref(),
                );
                self.mark_dead_by_reaper(job.job_id, &message).await.map(|ok| (ok, true))
            } else if config.policy == JobRecoveryPolicy::ToPending {
                match self.mark_pending_by_reaper(job.job_id).await {
                    Ok(true) => {
                        stats.to_pending += 1;
                        continue;
                    }
                    Ok(false) => {
                        stats.errors += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, job_id = %job.job_id, "reaper: failed to mark job pending");
                        stats.errors += 1;
                        continue;
                    }
                }
            } else {
                let message =
                    Self::format_error("Reaped: job lock expired", None, job.last_error.as_deref());
                self.mark_failed_by_reaper(job.job_id, &message, config.retry_delay_seconds)
                    .await
                    .map(|ok| (ok, false))
            };

            match outcome {
                Ok((true, true)) => stats.to_dead += 1,
                Ok((true, false)) => stats.to_failed += 1,
                Ok((false, _)) => stats.errors += 1,
                Err(e) => {
                    tracing::warn!(error = %e, job_id = %job.job_id, "reaper: failed to recover expired job");
                    stats.errors += 1;
                }
            }
        }

        stats
    }

    /// Pass 2: `running` `sync_runs` that have outlived
    /// [`ReaperConfig::run_max_duration_seconds`]. The run itself may belong
    /// to a job already handled by pass 1, or to one still mid-lease on
    /// another worker — either way a run this old is no longer trustworthy.
    async fn reap_expired_runs(&self, config: &ReaperConfig) -> PassStats {
        let mut stats = PassStats::default();

        let result = sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'failed',
                finished_at = NOW(),
                error_summary = jsonb_build_object(
                    'error_type', 'lease_lost',
                    'error_category', 'timeout',
                    'message', 'Reaped: sync run timed out'
                )
            WHERE status = 'running'
              AND started_at < NOW() - ($1 || ' seconds')::interval
            RETURNING run_id
            "#,
        )
        .bind(config.run_max_duration_seconds as i64)
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(rows) => {
                stats.processed = rows.len() as u64;
                stats.to_failed = rows.len() as u64;
            }
            Err(e) => {
                tracing::warn!(error = %e, "reaper: failed to reap expired sync runs");
                stats.errors += 1;
            }
        }

        stats
    }

    /// Pass 3: `sync_locks` rows whose lease has expired with no renewal.
    /// Force-releases unconditionally — the prior holder is presumed gone,
    /// not merely slow.
    async fn reap_expired_locks(&self, config: &ReaperConfig) -> PassStats {
        let mut stats = PassStats::default();

        let result = sqlx::query(
            r#"
            UPDATE sync_locks
            SET locked_by = NULL, locked_at = NULL
            WHERE locked_by IS NOT NULL
              AND locked_at + (lease_seconds || ' seconds')::interval < NOW() - ($1 || ' seconds')::interval
            RETURNING lock_id
            "#,
        )
        .bind(config.grace_seconds as i64)
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(rows) => {
                stats.processed = rows.len() as u64;
                stats.released = rows.len() as u64;
            }
            Err(e) => {
                tracing::warn!(error = %e, "reaper: failed to reap expired sync locks");
                stats.errors += 1;
            }
        }

        stats
    }
}
