use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use scm_sync_core::{
    Cursor, ErrorSummary, PhysicalJobType, RepoId, RunCounts, RunId, SyncMode, SyncRun,
    SyncRunStatus, SyncRunStore, SyncRunStoreError,
};
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PgSyncRunStore {
    pool: PgPool,
}

impl PgSyncRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: SyncRunStatus) -> &'static str {
    match status {
        SyncRunStatus::Running => "running",
        SyncRunStatus::Completed => "completed",
        SyncRunStatus::Failed => "failed",
        SyncRunStatus::NoData => "no_data",
    }
}

fn parse_status(s: &str) -> SyncRunStatus {
    match s {
        "completed" => SyncRunStatus::Completed,
        "failed" => SyncRunStatus::Failed,
        "no_data" => SyncRunStatus::NoData,
        _ => SyncRunStatus::Running,
    }
}

fn row_to_run(row: &sqlx::postgres::PgRow) -> Result<SyncRun, SyncRunStoreError> {
    let job_type: String = row.get("job_type");
    let job_type = job_type.parse::<PhysicalJobType>().unwrap_or(PhysicalJobType::GitlabCommits);
    let mode: String = row.get("mode");
    let mode = if mode == "backfill" { SyncMode::Backfill } else { SyncMode::Incremental };
    let status: String = row.get("status");
    let cursor_before: Option<serde_json::Value> = row.get("cursor_before");
    let cursor_after: Option<serde_json::Value> = row.get("cursor_after");
    let counts: serde_json::Value = row.get("counts");
    let error_summary: Option<serde_json::Value> = row.get("error_summary");

    Ok(SyncRun {
        run_id: RunId(row.get("run_id")),
        repo_id: RepoId(row.get("repo_id")),
        job_type,
        mode,
        status: parse_status(&status),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        cursor_before: cursor_before
            .map(|v| serde_json::from_value(v).unwrap_or(Cursor::Empty))
            .unwrap_or(Cursor::Empty),
        cursor_after: cursor_after.and_then(|v| serde_json::from_value(v).ok()),
        counts: match counts {
            serde_json::Value::Object(map) => map,
            _ => RunCounts::new(),
        },
        error_summary: error_summary.and_then(|v| serde_json::from_value(v).ok()),
        logbook_item_id: row.get("logbook_item_id"),
    })
}

#[async_trait]
impl SyncRunStore for PgSyncRunStore {
    async fn create(&self, run: &SyncRun) -> Result<(), SyncRunStoreError> {
        let cursor_before = serde_json::to_value(&run.cursor_before).map_err(|e| SyncRunStoreError::Storage(e.into()))?;
        sqlx::query(
            r#"
            INSERT INTO sync_runs (run_id, repo_id, job_type, mode, status, started_at, cursor_before, counts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run.run_id.0)
        .bind(run.repo_id.0)
        .bind(run.job_type.as_str())
        .bind(if run.mode == SyncMode::Backfill { "backfill" } else { "incremental" })
        .bind(status_str(run.status))
        .bind(run.started_at)
        .bind(cursor_before)
        .bind(serde_json::Value::Object(run.counts.clone()))
        .execute(&self.pool)
        .await
        .map_err(|e| SyncRunStoreError::Storage(e.into()))?;
        Ok(())
    }

    async fn finalize(
        &self,
        run_id: RunId,
        status: SyncRunStatus,
        finished_at: DateTime<Utc>,
        cursor_after: Option<Cursor>,
        counts: RunCounts,
        error_summary: Option<ErrorSummary>,
    ) -> Result<(), SyncRunStoreError> {
        let cursor_after =
            cursor_after.map(|c| serde_json::to_value(c)).transpose().map_err(|e| SyncRunStoreError::Storage(e.into()))?;
        let error_summary =
            error_summary.map(|e| serde_json::to_value(e)).transpose().map_err(|e| SyncRunStoreError::Storage(e.into()))?;

        let result = sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = $1, finished_at = $2, cursor_after = $3, counts = $4, error_summary = $5
            WHERE run_id = $6 AND status = 'running'
            "#,
        )
        .bind(status_str(status))
        .bind(finished_at)
        .bind(cursor_after)
        .bind(serde_json::Value::Object(counts))
        .bind(error_summary)
        .bind(run_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncRunStoreError::Storage(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(SyncRunStoreError::AlreadyFinalized(run_id));
        }
        Ok(())
    }

    async fn get(&self, run_id: RunId) -> Result<Option<SyncRun>, SyncRunStoreError> {
        let row = sqlx::query(
            "SELECT run_id, repo_id, job_type, mode, status, started_at, finished_at, cursor_before, cursor_after, counts, error_summary, logbook_item_id FROM sync_runs WHERE run_id = $1",
        )
        .bind(run_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncRunStoreError::Storage(e.into()))?;

        row.map(|row| row_to_run(&row)).transpose()
    }

    async fn find_expired_running(
        &self,
        max_duration_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncRun>, SyncRunStoreError> {
        let threshold = now - Duration::seconds(max_duration_seconds as i64);
        let rows = sqlx::query(
            "SELECT run_id, repo_id, job_type, mode, status, started_at, finished_at, cursor_before, cursor_after, counts, error_summary, logbook_item_id FROM sync_runs WHERE status = 'running' AND started_at < $1",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncRunStoreError::Storage(e.into()))?;

        rows.iter().map(row_to_run).collect()
    }
}
