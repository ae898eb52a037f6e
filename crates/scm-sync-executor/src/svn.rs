//! SVN revision sync: the one executor with an integer
//! revision cursor rather than a time cursor, so its windowing is plain
//! arithmetic instead of clock-skew overlap.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use scm_sync_core::{build_svn_revision_source_id, Cursor, PhysicalJobType, RunCounts};

use crate::errors::ExecutorError;
use crate::records::{SvnRevisionRecord, UpsertSink};
use crate::registry::{ExecutionContext, JobExecutor, WindowOutcome};
use crate::remote::{is_unrecoverable_remote_error, SvnClient};
use crate::window::compute_revision_start;

const DEFAULT_LIMIT: u32 = 100;
const DEFAULT_OVERLAP_REVS: i64 = 5;

pub struct SvnRevisionsExecutor {
    pub client: Arc<dyn SvnClient>,
    pub sink: Arc<dyn UpsertSink>,
    pub fetch_diffs: bool,
}

impl SvnRevisionsExecutor {
    pub fn new(client: Arc<dyn SvnClient>, sink: Arc<dyn UpsertSink>) -> Self {
        Self { client, sink, fetch_diffs: true }
    }
}

#[async_trait]
impl JobExecutor for SvnRevisionsExecutor {
    fn job_type(&self) -> PhysicalJobType {
        PhysicalJobType::Svn
    }

    async fn run_window(&self, cx: &ExecutionContext<'_>) -> Result<WindowOutcome, ExecutorError> {
        let cursor_rev = cx.cursor_before.as_revision().unwrap_or(0);
        let start_rev = if cx.mode == scm_sync_core::SyncMode::Backfill {
            1
        } else {
            compute_revision_start(cursor_rev.max(1), DEFAULT_OVERLAP_REVS)
        };
        let limit = cx.suggested_batch_size.unwrap_or(DEFAULT_LIMIT);

        let mut unrecoverable = Vec::new();

        let revisions = match self.client.log(start_rev, limit).await {
            Ok(revisions) => revisions,
            Err(e) => {
                if is_unrecoverable_remote_error(&e) {
                    if cx.strict {
                        return Ok(WindowOutcome { fatal: Some((e.category, e.message)), ..WindowOutcome::empty() });
                    }
                    unrecoverable.push(e.category);
                }
                Vec::new()
            }
        };

        let mut sorted = revisions;
        sorted.sort_by_key(|r| r.rev_num);

        let mut records = Vec::with_capacity(sorted.len());
        let mut last_rev = cursor_rev;

        for revision in &sorted {
            if revision.rev_num <= cursor_rev {
                continue;
            }
            if (cx.should_abort)() {
                return Ok(WindowOutcome {
                    counts: rev_counts(&records),
                    aborted_for_lease_loss: true,
                    ..WindowOutcome::empty()
                });
            }

            let diff_body = if self.fetch_diffs {
                match self.client.diff(revision.rev_num).await {
                    Ok(body) => Some(body),
                    Err(e) => {
                        if is_unrecoverable_remote_error(&e) {
                            if cx.strict {
                                continue;
                            }
                            unrecoverable.push(e.category);
                        }
                        None
                    }
                }
            } else {
                None
            };

            records.push(SvnRevisionRecord {
                repo_id: cx.repo.repo_id,
                source_id: build_svn_revision_source_id(cx.repo.repo_id, revision.rev_num),
                rev_num: revision.rev_num,
                author: revision.author.clone(),
                message: revision.message.clone(),
                committed_at: revision.committed_at.or(Some(Utc::now())),
                synthetic_ts: revision.committed_at.is_none(),
                diff_body,
            });
            last_rev = revision.rev_num;
        }

        let counts = rev_counts(&records);
        if !records.is_empty() {
            self.sink.upsert_svn_revisions(&records).await.map_err(|e| ExecutorError::Remote(e.to_string()))?;
        }

        let candidate_cursor = if last_rev > cursor_rev { Some(Cursor::Revision(last_rev)) } else { None };

        Ok(WindowOutcome {
            counts,
            candidate_cursor,
            unrecoverable_errors: unrecoverable,
            missing_types: Vec::new(),
            fatal: None,
            aborted_for_lease_loss: false,
        })
    }
}

fn rev_counts(records: &[SvnRevisionRecord]) -> RunCounts {
    let mut counts = RunCounts::new();
    counts.insert("revisions".to_string(), serde_json::Value::from(records.len()));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, SvnRevision};
    use scm_sync_core::{RepoId, RepoInfo, RepoType};
    use std::sync::Mutex;

    struct FakeSvnClient {
        revisions: Vec<SvnRevision>,
    }

    #[async_trait]
    impl SvnClient for FakeSvnClient {
        async fn log(&self, start_rev: i64, _limit: u32) -> Result<Vec<SvnRevision>, RemoteError> {
            Ok(self.revisions.iter().filter(|r| r.rev_num >= start_rev).cloned().collect())
        }
        async fn diff(&self, _rev_num: i64) -> Result<String, RemoteError> {
            Ok("diff body".to_string())
        }
    }

    struct FakeSink {
        revisions: Mutex<Vec<SvnRevisionRecord>>,
    }

    #[async_trait]
    impl UpsertSink for FakeSink {
        async fn upsert_commits(&self, _records: &[crate::records::GitCommitRecord]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_svn_revisions(&self, records: &[SvnRevisionRecord]) -> anyhow::Result<()> {
            self.revisions.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
        async fn upsert_mrs(&self, _records: &[crate::records::MrRecord]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_review_events(&self, _records: &[crate::records::ReviewEventRecord]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn repo() -> RepoInfo {
        RepoInfo {
            repo_id: RepoId(1),
            repo_type: RepoType::Svn,
            url: "svn://example.com/repo".to_string(),
            project_key: "repo".to_string(),
            default_branch: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn overlap_idempotency_does_not_reprocess_revisions_at_or_before_cursor() {
        let revisions = vec![
            SvnRevision { rev_num: 10, author: "a".to_string(), message: "m".to_string(), committed_at: Some(Utc::now()) },
            SvnRevision { rev_num: 11, author: "a".to_string(), message: "m".to_string(), committed_at: Some(Utc::now()) },
        ];
        let client = Arc::new(FakeSvnClient { revisions });
        let sink = Arc::new(FakeSink { revisions: Mutex::new(Vec::new()) });
        let executor = SvnRevisionsExecutor::new(client, sink.clone());

        let repo = repo();
        let cursor = Cursor::Revision(10);
        let worker_id = scm_sync_core::WorkerId("w".to_string());
        let no_abort = || false;
        let cx = ExecutionContext {
            repo: &repo,
            job_type: PhysicalJobType::Svn,
            mode: scm_sync_core::SyncMode::Incremental,
            run_id: scm_sync_core::RunId::new(),
            worker_id: &worker_id,
            cursor_before: &cursor,
            strict: false,
            since_override: None,
            until_override: None,
            suggested_batch_size: None,
            tenant_id: None,
            should_abort: &no_abort,
            locks: Arc::new(scm_sync_testing::FakeSyncLockManager::new(Arc::new(scm_sync_testing::VirtualClock::new(Utc::now())))),
        };

        let outcome = executor.run_window(&cx).await.unwrap();
        assert_eq!(sink.revisions.lock().unwrap().len(), 1);
        assert_eq!(outcome.candidate_cursor, Some(Cursor::Revision(11)));
    }
}
