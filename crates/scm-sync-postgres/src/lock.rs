use async_trait::async_trait;
use chrono::Utc;
use scm_sync_core::{LockError, LockInfo, PhysicalJobType, RepoId, SyncLockManager, WorkerId};
use sqlx::Row;
use sqlx::PgPool;

/// `sqlx`-backed [`SyncLockManager`]. Every mutating method is a single
/// atomic `UPDATE ... WHERE` compare-and-update — the same shape as
/// `PgJobStore::mark_succeeded`/`heartbeat`, generalized from the job's own
/// lease to the separate per-repo semantic lock.
#[derive(Clone)]
pub struct PgSyncLockManager {
    pool: PgPool,
}

impl PgSyncLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncLockManager for PgSyncLockManager {
    async fn claim(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
        lease_seconds: u64,
    ) -> Result<bool, LockError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO sync_locks (repo_id, job_type, locked_by, locked_at, lease_seconds)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (repo_id, job_type) DO UPDATE
            SET locked_by = EXCLUDED.locked_by,
                locked_at = EXCLUDED.locked_at,
                lease_seconds = EXCLUDED.lease_seconds
            WHERE sync_locks.locked_by IS NULL
               OR sync_locks.locked_at IS NULL
               OR sync_locks.locked_at + (sync_locks.lease_seconds || ' seconds')::interval <= $4
            "#,
        )
        .bind(repo_id.0)
        .bind(job_type.as_str())
        .bind(&worker_id.0)
        .bind(now)
        .bind(lease_seconds as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Storage(e.into()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
    ) -> Result<bool, LockError> {
        let result = sqlx::query(
            "UPDATE sync_locks SET locked_at = $1 WHERE repo_id = $2 AND job_type = $3 AND locked_by = $4",
        )
        .bind(Utc::now())
        .bind(repo_id.0)
        .bind(job_type.as_str())
        .bind(&worker_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Storage(e.into()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        worker_id: &WorkerId,
    ) -> Result<bool, LockError> {
        let result = sqlx::query(
            "UPDATE sync_locks SET locked_by = NULL, locked_at = NULL WHERE repo_id = $1 AND job_type = $2 AND locked_by = $3",
        )
        .bind(repo_id.0)
        .bind(job_type.as_str())
        .bind(&worker_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Storage(e.into()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
    ) -> Result<Option<LockInfo>, LockError> {
        let row = sqlx::query(
            "SELECT locked_by, locked_at, lease_seconds FROM sync_locks WHERE repo_id = $1 AND job_type = $2",
        )
        .bind(repo_id.0)
        .bind(job_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Storage(e.into()))?;

        Ok(row.map(|row| LockInfo {
            repo_id,
            job_type,
            locked_by: row.get::<Option<String>, _>("locked_by").map(WorkerId),
            locked_at: row.get("locked_at"),
            lease_seconds: row.get::<i64, _>("lease_seconds") as u64,
        }))
    }

    async fn force_release(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
    ) -> Result<(), LockError> {
        sqlx::query("UPDATE sync_locks SET locked_by = NULL, locked_at = NULL WHERE repo_id = $1 AND job_type = $2")
            .bind(repo_id.0)
            .bind(job_type.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::Storage(e.into()))?;
        Ok(())
    }
}
