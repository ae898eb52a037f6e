use async_trait::async_trait;
use scm_sync_core::{Cursor, CursorEnvelope, CursorStats, CursorStore, CursorStoreError, PhysicalJobType, RepoId, should_advance};
use sqlx::{PgPool, Row};

/// `sqlx`-backed [`CursorStore`]; monotone advancement is enforced in
/// application code (read-modify-write under `SELECT ... FOR UPDATE`)
/// rather than in SQL, since the comparison rule depends on the cursor's
/// logical shape, not a single column order.
#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
    ) -> Result<(Cursor, CursorStats), CursorStoreError> {
        let row = sqlx::query("SELECT cursor FROM sync_cursors WHERE repo_id = $1 AND job_type = $2")
            .bind(repo_id.0)
            .bind(job_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CursorStoreError::Storage(e.into()))?;

        match row {
            None => Ok((Cursor::Empty, CursorStats::new())),
            Some(row) => {
                let raw: serde_json::Value = row.get("cursor");
                let envelope: CursorEnvelope = serde_json::from_value(raw)
                    .map_err(|e| CursorStoreError::Storage(e.into()))?;
                Ok(envelope.into_cursor())
            }
        }
    }

    async fn save(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        new_cursor: Cursor,
        stats: CursorStats,
    ) -> Result<bool, CursorStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| CursorStoreError::Storage(e.into()))?;

        let row = sqlx::query(
            "SELECT cursor FROM sync_cursors WHERE repo_id = $1 AND job_type = $2 FOR UPDATE",
        )
        .bind(repo_id.0)
        .bind(job_type.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CursorStoreError::Storage(e.into()))?;

        let current = match row {
            None => Cursor::Empty,
            Some(row) => {
                let raw: serde_json::Value = row.get("cursor");
                let envelope: CursorEnvelope =
                    serde_json::from_value(raw).map_err(|e| CursorStoreError::Storage(e.into()))?;
                envelope.into_cursor().0
            }
        };

        if !should_advance(&new_cursor, &current) {
            tracing::debug!(
                repo_id = repo_id.0,
                job_type = job_type.as_str(),
                "cursor save is a no-op: new cursor does not advance current"
            );
            tx.commit().await.map_err(|e| CursorStoreError::Storage(e.into()))?;
            return Ok(false);
        }

        let envelope = CursorEnvelope::from_parts(new_cursor, stats);
        let encoded = serde_json::to_value(&envelope).map_err(|e| CursorStoreError::Storage(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO sync_cursors (repo_id, job_type, cursor)
            VALUES ($1, $2, $3)
            ON CONFLICT (repo_id, job_type) DO UPDATE SET cursor = EXCLUDED.cursor
            "#,
        )
        .bind(repo_id.0)
        .bind(job_type.as_str())
        .bind(encoded)
        .execute(&mut *tx)
        .await
        .map_err(|e| CursorStoreError::Storage(e.into()))?;

        tx.commit().await.map_err(|e| CursorStoreError::Storage(e.into()))?;
        Ok(true)
    }
}
