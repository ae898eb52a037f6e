use async_trait::async_trait;
use chrono::{Duration, Utc};
use scm_sync_core::errors::redact;
use scm_sync_core::queue::pool::ClaimFilter;
use scm_sync_core::{
    JobId, JobPayload, JobQueue, JobStatus, PhysicalJobType, QueueError, RepoId, SyncJob, SyncMode,
    WorkerId,
};
use sqlx::{PgPool, QueryBuilder, Row};

/// `sqlx`-backed [`JobQueue`]. `claim` generalizes `PgJobStore::claim_ready`'s
/// `FOR UPDATE SKIP LOCKED` CTE to a richer predicate (status OR
/// expired-lease reclaim, `not_before`, and the optional pool filters);
/// `fail_retry`/`mark_dead` generalize `PgJobStore::mark_failed`'s
/// attempt-vs-`max_attempts` branch.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<SyncJob, QueueError> {
        let job_type_str: String = row.get("job_type");
        let job_type = job_type_str
            .parse::<scm_sync_core::JobType>()
            .ok()
            .and_then(|jt| match jt {
                scm_sync_core::JobType::Physical(p) => Some(p),
                scm_sync_core::JobType::Logical(_) => None,
            })
            .unwrap_or(PhysicalJobType::GitlabCommits);
        let mode_str: String = row.get("mode");
        let mode = if mode_str == "backfill" { SyncMode::Backfill } else { SyncMode::Incremental };
        let status_str: String = row.get("status");
        let status = match status_str.as_str() {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "failed" => JobStatus::Failed,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Dead,
        };
        let payload_json: serde_json::Value = row.get("payload");
        let payload: JobPayload =
            serde_json::from_value(payload_json).map_err(|e| QueueError::Storage(e.into()))?;

        Ok(SyncJob {
            job_id: JobId(row.get("job_id")),
            repo_id: RepoId(row.get("repo_id")),
            job_type,
            mode,
            priority: row.get("priority"),
            status,
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            locked_by: row.get::<Option<String>, _>("locked_by").map(WorkerId),
            locked_at: row.get("locked_at"),
            lease_seconds: row.get::<i64, _>("lease_seconds") as u64,
            not_before: row.get("not_before"),
            last_error: row.get("last_error"),
            payload,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn claim(
        &self,
        worker_id: &WorkerId,
        lease_seconds: u64,
        filter: &ClaimFilter,
    ) -> Result<Option<SyncJob>, QueueError> {
        let now = Utc::now();

        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            r#"
            WITH claimable AS (
                SELECT j.job_id
                FROM sync_jobs j
                JOIN repos r ON r.repo_id = j.repo_id
                WHERE (
                        (j.status = 'pending' AND (j.not_before IS NULL OR j.not_before <= "#,
        );
        builder.push_bind(now);
        builder.push(
            r#"))
                        OR (j.status = 'running' AND j.locked_at + (j.lease_seconds || ' seconds')::interval < "#,
        );
        builder.push_bind(now);
        builder.push(")) ");

        if let Some(job_types) = &filter.job_types {
            let names: Vec<&'static str> = job_types.iter().map(|t| t.as_str()).collect();
            builder.push(" AND j.job_type = ANY(");
            builder.push_bind(names);
            builder.push(") ");
        }
        if let Some(allowlist) = &filter.instance_allowlist {
            builder.push(" AND (");
            for (i, instance) in allowlist.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push("r.url ILIKE ");
                builder.push_bind(format!("%{instance}%"));
            }
            builder.push(") ");
        }
        if let Some(allowlist) = &filter.tenant_allowlist {
            builder.push(" AND (");
            for (i, tenant) in allowlist.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push("j.payload->>'tenant_id' = ");
                builder.push_bind(tenant.clone());
            }
            builder.push(") ");
        }

        builder.push(
            r#"
                ORDER BY j.priority ASC, j.created_at ASC
                LIMIT 1
                FOR UPDATE OF j SKIP LOCKED
            )
            UPDATE sync_jobs
            SET status = 'running',
                locked_by = "#,
        );
        builder.push_bind(worker_id.0.clone());
        builder.push(", locked_at = ");
        builder.push_bind(now);
        builder.push(", lease_seconds = ");
        builder.push_bind(lease_seconds as i64);
        builder.push(
            r#", attempts = attempts + 1, updated_at = "#,
        );
        builder.push_bind(now);
        builder.push(
            r#"
            WHERE job_id IN (SELECT job_id FROM claimable)
            RETURNING job_id, repo_id, job_type, mode, priority, status, attempts, max_attempts,
                      locked_by, locked_at, lease_seconds, not_before, last_error, payload,
                      created_at, updated_at
            "#,
        );

        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(e.into()))?;

        row.map(|row| Self::row_to_job(&row)).transpose()
    }

    async fn ack(&self, job_id: JobId, worker_id: &WorkerId) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'completed', updated_at = NOW() WHERE job_id = $1 AND locked_by = $2",
        )
        .bind(job_id.0)
        .bind(&worker_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(e.into()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail_retry(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
        backoff_seconds: u64,
    ) -> Result<bool, QueueError> {
        let mut tx = self.pool.begin().await.map_err(|e| QueueError::Storage(e.into()))?;

        let row = sqlx::query(
            "SELECT attempts, max_attempts, locked_by FROM sync_jobs WHERE job_id = $1 FOR UPDATE",
        )
        .bind(job_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| QueueError::Storage(e.into()))?;

        let Some(row) = row else {
            return Ok(false);
        };
        let locked_by: Option<String> = row.get("locked_by");
        if locked_by.as_deref() != Some(worker_id.0.as_str()) {
            return Ok(false);
        }
        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");
        let redacted = redact(error);

        if attempts >= max_attempts {
            sqlx::query(
                "UPDATE sync_jobs SET status = 'dead', last_error = $1, locked_by = NULL, locked_at = NULL, updated_at = NOW() WHERE job_id = $2",
            )
            .bind(&redacted)
            .bind(job_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| QueueError::Storage(e.into()))?;
        } else {
            let not_before = Utc::now() + Duration::seconds(backoff_seconds as i64);
            sqlx::query(
                "UPDATE sync_jobs SET status = 'failed', last_error = $1, not_before = $2, locked_by = NULL, locked_at = NULL, updated_at = NOW() WHERE job_id = $3",
            )
            .bind(&redacted)
            .bind(not_before)
            .bind(job_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| QueueError::Storage(e.into()))?;
        }

        tx.commit().await.map_err(|e| QueueError::Storage(e.into()))?;
        Ok(true)
    }

    async fn mark_dead(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        error: &str,
    ) -> Result<bool, QueueError> {
        let redacted = redact(error);
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'dead', last_error = $1, locked_by = NULL, locked_at = NULL, updated_at = NOW() WHERE job_id = $2 AND locked_by = $3",
        )
        .bind(&redacted)
        .bind(job_id.0)
        .bind(&worker_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(e.into()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew_lease(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
        lease_seconds: u64,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET locked_at = NOW(), lease_seconds = $1, updated_at = NOW() WHERE job_id = $2 AND locked_by = $3 AND status = 'running'",
        )
        .bind(lease_seconds as i64)
        .bind(job_id.0)
        .bind(&worker_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(e.into()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue_without_penalty(
        &self,
        job_id: JobId,
        worker_id: &WorkerId,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE sync_jobs SET status = 'pending', locked_by = NULL, locked_at = NULL, updated_at = NOW() WHERE job_id = $1 AND locked_by = $2",
        )
        .bind(job_id.0)
        .bind(&worker_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| QueueError::Storage(e.into()))?;

        Ok(result.rows_affected() == 1)
    }
}
