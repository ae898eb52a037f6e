//! GitLab merge request sync: paginated MR listing ordered by
//! `updated_at`, upserted against the shared `build_mr_id` identity also
//! used by the review-event executor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use scm_sync_core::{build_mr_id, Cursor, PhysicalJobType, RunCounts};

use crate::errors::ExecutorError;
use crate::records::{MrRecord, UpsertSink};
use crate::registry::{ExecutionContext, JobExecutor, WindowOutcome};
use crate::remote::{is_unrecoverable_remote_error, GitLabClient, MrStateFilter};
use crate::window::DEFAULT_OVERLAP_SECONDS;

const DEFAULT_BATCH_SIZE: u32 = 100;

pub struct GitLabMrsExecutor {
    pub client: Arc<dyn GitLabClient>,
    pub sink: Arc<dyn UpsertSink>,
}

impl GitLabMrsExecutor {
    pub fn new(client: Arc<dyn GitLabClient>, sink: Arc<dyn UpsertSink>) -> Self {
        Self { client, sink }
    }
}

#[async_trait]
impl JobExecutor for GitLabMrsExecutor {
    fn job_type(&self) -> PhysicalJobType {
        PhysicalJobType::GitlabMrs
    }

    async fn run_window(&self, cx: &ExecutionContext<'_>) -> Result<WindowOutcome, ExecutorError> {
        let now = Utc::now();
        let cursor_timestamp = cx.cursor_before.as_time().map(|(ts, _)| ts);

        let updated_after = if cx.mode == scm_sync_core::SyncMode::Backfill {
            cx.since_override.unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap())
        } else {
            cursor_timestamp
                .map(|ts| ts - chrono::Duration::seconds(DEFAULT_OVERLAP_SECONDS))
                .unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap())
        };

        let per_page = cx.suggested_batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let project_id = &cx.repo.project_key;

        let mut unrecoverable = Vec::new();

        let mrs = match self.client.list_merge_requests(project_id, MrStateFilter::All, updated_after, per_page).await {
            Ok(mrs) => mrs,
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

        // GitLab returns MRs `order_by=updated_at, sort=asc`; the cursor is
        // the (updated_at, mr_id) of the last one actually written.
        let mut sorted = mrs;
        sorted.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));

        let mut records = Vec::with_capacity(sorted.len());
        let mut last_key: Option<(chrono::DateTime<Utc>, String)> = None;

        for mr in &sorted {
            if (cx.should_abort)() {
                return Ok(WindowOutcome {
                    counts: mr_counts(&records),
                    aborted_for_lease_loss: true,
                    ..WindowOutcome::empty()
                });
            }
            let mr_id = build_mr_id(cx.repo.repo_id, mr.iid);
            let updated_at = mr.updated_at.unwrap_or(now);
            if let Some(cursor_ts) = cursor_timestamp {
                if updated_at <= cursor_ts {
                    continue;
                }
            }
            records.push(MrRecord {
                repo_id: cx.repo.repo_id,
                mr_id,
                iid: mr.iid,
                title: mr.title.clone(),
                description: mr.description.clone(),
                state: mr.state.clone(),
                source_branch: mr.source_branch.clone(),
                target_branch: mr.target_branch.clone(),
                created_at: mr.created_at,
                updated_at: mr.updated_at,
                merged_at: mr.merged_at,
                closed_at: mr.closed_at,
                web_url: mr.web_url.clone(),
                labels: mr.labels.clone(),
            });
            last_key = Some((updated_at, mr.iid.to_string()));
        }

        let counts = mr_counts(&records);
        if !records.is_empty() {
            self.sink.upsert_mrs(&records).await.map_err(|e| ExecutorError::Remote(e.to_string()))?;
        }

        let candidate_cursor = last_key.map(|(ts, id)| Cursor::time(ts, id));

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

fn mr_counts(records: &[MrRecord]) -> RunCounts {
    let mut counts = RunCounts::new();
    counts.insert("merge_requests".to_string(), serde_json::Value::from(records.len()));
    counts
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use scm_sync_core::{PhysicalJobType, RepoId, RepoInfo, RepoType, WorkerId};
    use scm_sync_testing::VirtualClock;

    use super::*;
    use crate::remote::{RemoteApprovalEvent, RemoteMergeRequest, RemoteNoteEvent, RemoteStateEvent};

    struct FakeClient {
        mrs: Vec<RemoteMergeRequest>,
    }

    #[async_trait]
    impl GitLabClient for FakeClient {
        async fn list_commits(
            &self,
            _project_id: &str,
            _ref_name: Option<&str>,
            _since: chrono::DateTime<Utc>,
            _until: chrono::DateTime<Utc>,
            _per_page: u32,
        ) -> Result<Vec<crate::remote::RemoteCommit>, crate::remote::RemoteError> {
            Ok(vec![])
        }

        async fn get_commit_diff(
            &self,
            _project_id: &str,
            _sha: &str,
        ) -> Result<Vec<crate::remote::RemoteDiffEntry>, crate::remote::RemoteError> {
            Ok(vec![])
        }

        async fn list_merge_requests(
            &self,
            _project_id: &str,
            _state: MrStateFilter,
            _updated_after: chrono::DateTime<Utc>,
            _per_page: u32,
        ) -> Result<Vec<RemoteMergeRequest>, crate::remote::RemoteError> {
            Ok(self.mrs.clone())
        }

        async fn list_mr_notes(
            &self,
            _project_id: &str,
            _mr_iid: i64,
        ) -> Result<Vec<RemoteNoteEvent>, crate::remote::RemoteError> {
            Ok(vec![])
        }

        async fn list_mr_approvals(
            &self,
            _project_id: &str,
            _mr_iid: i64,
        ) -> Result<Vec<RemoteApprovalEvent>, crate::remote::RemoteError> {
            Ok(vec![])
        }

        async fn list_mr_resource_state_events(
            &self,
            _project_id: &str,
            _mr_iid: i64,
        ) -> Result<Vec<RemoteStateEvent>, crate::remote::RemoteError> {
            Ok(vec![])
        }
    }

    struct FakeSink {
        mrs: Mutex<Vec<MrRecord>>,
    }

    #[async_trait]
    impl UpsertSink for FakeSink {
        async fn upsert_commits(&self, _records: &[crate::records::GitCommitRecord]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_svn_revisions(&self, _records: &[crate::records::SvnRevisionRecord]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn upsert_mrs(&self, records: &[MrRecord]) -> anyhow::Result<()> {
            self.mrs.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
        async fn upsert_review_events(&self, _records: &[crate::records::ReviewEventRecord]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn repo() -> RepoInfo {
        RepoInfo {
            repo_id: RepoId(1),
            repo_type: RepoType::Git,
            url: "https://gitlab.example.com/g/p".to_string(),
            project_key: "g/p".to_string(),
            default_branch: Some("main".to_string()),
            created_at: Utc::now(),
        }
    }

    fn cx_fixture<'a>(
        repo: &'a RepoInfo,
        cursor: &'a Cursor,
        worker_id: &'a WorkerId,
        no_abort: &'a (dyn Fn() -> bool + Send + Sync),
        locks: std::sync::Arc<dyn scm_sync_core::SyncLockManager>,
    ) -> ExecutionContext<'a> {
        ExecutionContext {
            repo,
            job_type: PhysicalJobType::GitlabMrs,
            mode: scm_sync_core::SyncMode::Incremental,
            run_id: scm_sync_core::RunId::new(),
            worker_id,
            cursor_before: cursor,
            strict: false,
            since_override: None,
            until_override: None,
            suggested_batch_size: None,
            tenant_id: None,
            should_abort: no_abort,
            locks,
        }
    }

    #[tokio::test]
    async fn fetches_and_sorts_mrs_by_updated_at_advancing_cursor() {
        let t0 = Utc::now();
        let mrs = vec![
            RemoteMergeRequest {
                iid: 2,
                updated_at: Some(t0 + chrono::Duration::seconds(10)),
                ..RemoteMergeRequest::default()
            },
            RemoteMergeRequest { iid: 1, updated_at: Some(t0), ..RemoteMergeRequest::default() },
        ];
        let client = Arc::new(FakeClient { mrs });
        let sink = Arc::new(FakeSink { mrs: Mutex::new(Vec::new()) });
        let executor = GitLabMrsExecutor::new(client, sink.clone());

        let repo = repo();
        let cursor = Cursor::Empty;
        let worker_id = WorkerId("w".to_string());
        let no_abort = || false;
        let locks = Arc::new(scm_sync_testing::FakeSyncLockManager::new(Arc::new(VirtualClock::new(Utc::now()))));
        let cx = cx_fixture(&repo, &cursor, &worker_id, &no_abort, locks);

        let outcome = executor.run_window(&cx).await.unwrap();
        assert_eq!(sink.mrs.lock().unwrap().len(), 2);
        // Cursor must land on the later of the two (iid 2), not input order.
        match outcome.candidate_cursor {
            Some(Cursor::Time { secondary_id, .. }) => assert_eq!(secondary_id, "2"),
            other => panic!("expected a time cursor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mrs_at_or_before_cursor_are_skipped() {
        let t0 = Utc::now();
        let mrs = vec![RemoteMergeRequest { iid: 1, updated_at: Some(t0), ..RemoteMergeRequest::default() }];
        let client = Arc::new(FakeClient { mrs });
        let sink = Arc::new(FakeSink { mrs: Mutex::new(Vec::new()) });
        let executor = GitLabMrsExecutor::new(client, sink.clone());

        let repo = repo();
        let cursor = Cursor::time(t0, "1".to_string());
        let worker_id = WorkerId("w".to_string());
        let no_abort = || false;
        let locks = Arc::new(scm_sync_testing::FakeSyncLockManager::new(Arc::new(VirtualClock::new(Utc::now()))));
        let cx = cx_fixture(&repo, &cursor, &worker_id, &no_abort, locks);

        let outcome = executor.run_window(&cx).await.unwrap();
        assert!(sink.mrs.lock().unwrap().is_empty());
        assert!(outcome.candidate_cursor.is_none());
    }
}
