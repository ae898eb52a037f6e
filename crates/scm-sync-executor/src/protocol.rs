//! The ten-phase sync executor protocol, driving any
//! registered [`JobExecutor`] through lock acquisition, cursor load,
//! window execution, cursor-advance decision, and unconditional lock
//! release.

use chrono::Utc;
use scm_sync_core::{
    ErrorSummary, PhysicalJobType, RepoType, RunId, SyncJob, SyncMode, SyncRun, SyncRunStatus,
    WorkerId,
};

use crate::decide::decide_cursor_advance;
use crate::registry::{ExecutionContext, ExecutorRegistry, ExecutorStores};
use crate::result::{ExecutorResult, ExecutorResultKind};

pub struct ExecutorDriver {
    stores: ExecutorStores,
    registry: ExecutorRegistry,
}

/// Phase 1/3/5 inputs the worker loop already has in hand: the claimed job,
/// the repo identity to upsert, and the cooperative-abort check wired to
/// the Heartbeat Manager.
pub struct RunJobRequest<'a> {
    pub job: &'a SyncJob,
    pub repo_type: RepoType,
    pub repo_url: &'a str,
    pub project_key: &'a str,
    pub default_branch: Option<&'a str>,
    pub worker_id: &'a WorkerId,
    pub lease_seconds: u64,
    pub strict: bool,
    pub should_abort: &'a (dyn Fn() -> bool + Send + Sync),
}

impl ExecutorDriver {
    pub fn new(stores: ExecutorStores, registry: ExecutorRegistry) -> Self {
        Self { stores, registry }
    }

    /// Phases 1-10. Never returns an `Err` for a remote/store failure that
    /// can be attributed to the job — those become `ExecutorResultKind::
    /// Failed`. Store calls that fail before a lock is even attempted (repo
    /// upsert) also degrade to `Failed` rather than propagating, since the
    /// caller (worker loop) treats both the same way: `fail_retry`/
    /// `mark_dead` by category.
    pub async fn run_job(&self, req: RunJobRequest<'_>) -> ExecutorResult {
        let run_id = RunId::new();

        let repo_id = match self
            .stores
            .repos
            .ensure_repo(req.repo_type, req.repo_url, req.project_key, req.default_branch)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                return ExecutorResult {
                    kind: ExecutorResultKind::Failed {
                        category: scm_sync_core::ErrorCategory::RepoNotFound,
                        detail: e.to_string(),
                    },
                    run_id: Some(run_id),
                    counts: scm_sync_core::RunCounts::new(),
                    cursor_advance_reason: None,
                    watermark_updated: false,
                    missing_types: Vec::new(),
                };
            }
        };

        let job_type = req.job.job_type;

        let claimed = match self.stores.locks.claim(repo_id, job_type, req.worker_id, req.lease_seconds).await {
            Ok(claimed) => claimed,
            Err(e) => {
                return ExecutorResult {
                    kind: ExecutorResultKind::Failed {
                        category: scm_sync_core::ErrorCategory::ServerError,
                        detail: e.to_string(),
                    },
                    run_id: Some(run_id),
                    counts: scm_sync_core::RunCounts::new(),
                    cursor_advance_reason: None,
                    watermark_updated: false,
                    missing_types: Vec::new(),
                };
            }
        };
        if !claimed {
            return ExecutorResult::locked();
        }

        let outcome = self.run_locked(repo_id, job_type, run_id, &req).await;

        if let Err(e) = self.stores.locks.release(repo_id, job_type, req.worker_id).await {
            tracing::warn!(error = %e, %repo_id, %job_type, %run_id, "sync lock release failed, leaving lease to expire");
        }

        outcome
    }

    async fn run_locked(
        &self,
        repo_id: scm_sync_core::RepoId,
        job_type: PhysicalJobType,
        run_id: RunId,
        req: &RunJobRequest<'_>,
    ) -> ExecutorResult {
        let (cursor_before, _stats) = match self.stores.cursors.load(repo_id, job_type).await {
            Ok(loaded) => loaded,
            Err(e) => {
                return ExecutorResult {
                    kind: ExecutorResultKind::Failed {
                        category: scm_sync_core::ErrorCategory::ServerError,
                        detail: e.to_string(),
                    },
                    run_id: Some(run_id),
                    counts: scm_sync_core::RunCounts::new(),
                    cursor_advance_reason: None,
                    watermark_updated: false,
                    missing_types: Vec::new(),
                };
            }
        };

        let started_at = Utc::now();
        let run = SyncRun::start(run_id, repo_id, job_type, req.job.mode, started_at, cursor_before.clone());
        if let Err(e) = self.stores.runs.create(&run).await {
            return ExecutorResult {
                kind: ExecutorResultKind::Failed {
                    category: scm_sync_core::ErrorCategory::ServerError,
                    detail: e.to_string(),
                },
                run_id: Some(run_id),
                counts: scm_sync_core::RunCounts::new(),
                cursor_advance_reason: None,
                watermark_updated: false,
                missing_types: Vec::new(),
            };
        }

        let executor = match self.registry.get(job_type) {
            Some(executor) => executor,
            None => {
                return self
                    .finalize_failed(
                        run_id,
                        scm_sync_core::ErrorCategory::RepoTypeUnknown,
                        format!("no executor registered for job_type {job_type}"),
                    )
                    .await;
            }
        };

        let update_watermark = match req.job.mode {
            SyncMode::Backfill => req.job.payload.update_watermark.unwrap_or(false),
            SyncMode::Incremental => req.job.payload.update_watermark.unwrap_or(true),
        };

        let repo = match self.stores.repos.get(repo_id).await {
            Ok(Some(repo)) => repo,
            Ok(None) => {
                return self
                    .finalize_failed(
                        run_id,
                        scm_sync_core::ErrorCategory::RepoNotFound,
                        format!("repo {repo_id} vanished after ensure_repo"),
                    )
                    .await;
            }
            Err(e) => {
                return self.finalize_failed(run_id, scm_sync_core::ErrorCategory::ServerError, e.to_string()).await;
            }
        };

        let cx = ExecutionContext {
            repo: &repo,
            job_type,
            mode: req.job.mode,
            run_id,
            worker_id: req.worker_id,
            cursor_before: &cursor_before,
            strict: req.strict,
            since_override: req.job.payload.since,
            until_override: req.job.payload.until,
            suggested_batch_size: req.job.payload.suggested_batch_size,
            tenant_id: req.job.payload.tenant_id.as_deref(),
            should_abort: req.should_abort,
            locks: self.stores.locks.clone(),
        };

        let window = match executor.run_window(&cx).await {
            Ok(window) => window,
            Err(e) => {
                return self.finalize_failed(run_id, scm_sync_core::ErrorCategory::ServerError, e.to_string()).await;
            }
        };

        if let Some((category, detail)) = window.fatal {
            return self.finalize_failed(run_id, category, detail).await;
        }

        if window.aborted_for_lease_loss {
            return self
                .finalize(
                    run_id,
                    SyncRunStatus::Failed,
                    window.counts,
                    None,
                    Some(ErrorSummary {
                        error_type: "lease_lost".to_string(),
                        error_category: Some(scm_sync_core::ErrorCategory::LeaseLost.as_str().to_string()),
                        message: "heartbeat signalled should_abort at a safe point".to_string(),
                    }),
                    Vec::new(),
                    ExecutorResultKind::LeaseLost,
                )
                .await;
        }

        let decision = decide_cursor_advance(
            &cursor_before,
            window.candidate_cursor.as_ref(),
            update_watermark,
            req.strict,
            &window.unrecoverable_errors,
        );

        let cursor_after = if decision.advance { window.candidate_cursor.clone() } else { None };

        if decision.advance {
            if let Some(new_cursor) = &cursor_after {
                if let Err(e) = self
                    .stores
                    .cursors
                    .save(repo_id, job_type, new_cursor.clone(), scm_sync_core::CursorStats::new())
                    .await
                {
                    tracing::warn!(error = %e, %repo_id, %job_type, %run_id, "cursor save failed after advance decision");
                }
            }
        }

        let error_summary = window.unrecoverable_errors.first().map(|category| ErrorSummary {
            error_type: "degraded_batch".to_string(),
            error_category: Some(category.as_str().to_string()),
            message: decision.reason.clone(),
        });

        // Strict mode reports the run as failed on any unrecoverable error,
        // even when the cursor still advanced to the last fully-successful
        // record. Best-effort degrades gracefully instead: an
        // unrecoverable error there only ever shows up as `missing_types`.
        let status = if window.unrecoverable_errors.is_empty() {
            SyncRunStatus::Completed
        } else if req.strict {
            SyncRunStatus::Failed
        } else {
            SyncRunStatus::Completed
        };

        let kind = if status == SyncRunStatus::Failed {
            ExecutorResultKind::Failed {
                category: window.unrecoverable_errors[0],
                detail: decision.reason.clone(),
            }
        } else {
            ExecutorResultKind::Ok
        };

        let mut result = self
            .finalize(
                run_id,
                status,
                window.counts,
                cursor_after,
                error_summary,
                window.missing_types,
                kind,
            )
            .await;
        result.cursor_advance_reason = Some(decision.reason);
        result.watermark_updated = decision.advance;
        result
    }

    async fn finalize_failed(
        &self,
        run_id: RunId,
        category: scm_sync_core::ErrorCategory,
        detail: String,
    ) -> ExecutorResult {
        self.finalize(
            run_id,
            SyncRunStatus::Failed,
            scm_sync_core::RunCounts::new(),
            None,
            Some(ErrorSummary {
                error_type: "executor_error".to_string(),
                error_category: Some(category.as_str().to_string()),
                message: detail.clone(),
            }),
            Vec::new(),
            ExecutorResultKind::Failed { category, detail },
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        run_id: RunId,
        status: SyncRunStatus,
        counts: scm_sync_core::RunCounts,
        cursor_after: Option<scm_sync_core::Cursor>,
        error_summary: Option<ErrorSummary>,
        missing_types: Vec<String>,
        kind: ExecutorResultKind,
    ) -> ExecutorResult {
        let status = if counts.is_empty() && status == SyncRunStatus::Completed {
            SyncRunStatus::NoData
        } else {
            status
        };
        if let Err(e) = self
            .stores
            .runs
            .finalize(run_id, status, Utc::now(), cursor_after.clone(), counts.clone(), error_summary.clone())
            .await
        {
            tracing::warn!(error = %e, %run_id, "sync run finalize failed");
        }
        ExecutorResult {
            kind,
            run_id: Some(run_id),
            counts,
            cursor_advance_reason: None,
            watermark_updated: false,
            missing_types,
        }
    }
}
