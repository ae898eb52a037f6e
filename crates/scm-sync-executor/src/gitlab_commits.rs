//! GitLab commit sync: paginated commit listing with an adaptive fetch
//! window, per-commit diff fetching, and dedup-before-upsert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use scm_sync_core::{build_git_commit_source_id, Cursor, ErrorCategory, PhysicalJobType, RepoId, RunCounts};

use crate::diff::{deduplicate_commits, generate_ministat, DiffMode};
use crate::errors::ExecutorError;
use crate::records::{GitCommitRecord, UpsertSink};
use crate::registry::{ExecutionContext, JobExecutor, WindowOutcome};
use crate::remote::{is_unrecoverable_remote_error, GitLabClient, RemoteCommit};
use crate::window::{compute_time_window, AdaptiveWindowState, DEFAULT_FORWARD_WINDOW_SECONDS, DEFAULT_OVERLAP_SECONDS};

const DEFAULT_BATCH_SIZE: u32 = 100;
const MIN_WINDOW_SECONDS: i64 = 300;
const MAX_WINDOW_SECONDS: i64 = 7 * 24 * 3600;

pub struct GitLabCommitsExecutor {
    pub client: Arc<dyn GitLabClient>,
    pub sink: Arc<dyn UpsertSink>,
    pub diff_mode: DiffMode,
    pub ref_name: Option<String>,
    // Keyed per repo: one worker process may run this executor against many
    // repos, each with its own rate-limit history (window.rs `AdaptiveWindowState`).
    adaptive_windows: Mutex<HashMap<RepoId, AdaptiveWindowState>>,
}

impl GitLabCommitsExecutor {
    pub fn new(client: Arc<dyn GitLabClient>, sink: Arc<dyn UpsertSink>) -> Self {
        Self {
            client,
            sink,
            diff_mode: DiffMode::BestEffort,
            ref_name: None,
            adaptive_windows: Mutex::new(HashMap::new()),
        }
    }

    fn stats_u64(commit: &RemoteCommit, key: &str) -> u64 {
        commit.stats.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    async fn build_record(
        &self,
        repo_id: scm_sync_core::RepoId,
        commit: &RemoteCommit,
        project_id: &str,
        unrecoverable: &mut Vec<ErrorCategory>,
        strict: bool,
    ) -> Result<Option<GitCommitRecord>, ExecutorError> {
        let (diffstat, patch_body) = match self.diff_mode {
            DiffMode::None => (None, None),
            DiffMode::Always | DiffMode::BestEffort => match self.client.get_commit_diff(project_id, &commit.sha).await {
                Ok(entries) => {
                    let body = entries.iter().map(|e| e.diff.clone()).collect::<Vec<_>>().join("\n");
                    (Some(format!("{} file(s) changed", entries.len())), Some(body))
                }
                Err(e) => {
                    if self.diff_mode == DiffMode::Always {
                        if is_unrecoverable_remote_error(&e) {
                            if strict {
                                return Ok(None);
                            }
                            unrecoverable.push(e.category);
                        }
                        return Ok(None);
                    }
                    let short_sha: String = commit.sha.chars().take(8).collect();
                    let additions = Self::stats_u64(commit, "additions");
                    let deletions = Self::stats_u64(commit, "deletions");
                    let total = Self::stats_u64(commit, "total");
                    (Some(generate_ministat(&short_sha, additions, deletions, total)), None)
                }
            },
        };

        Ok(Some(GitCommitRecord {
            repo_id,
            source_id: build_git_commit_source_id(repo_id, &commit.sha),
            sha: commit.sha.clone(),
            author_name: commit.author_name.clone(),
            author_email: commit.author_email.clone(),
            authored_at: commit.authored_date,
            committer_name: commit.committer_name.clone(),
            committer_email: commit.committer_email.clone(),
            committed_at: commit.committed_date.or(Some(Utc::now())),
            synthetic_ts: commit.committed_date.is_none(),
            message: commit.message.clone(),
            parent_shas: commit.parent_ids.clone(),
            web_url: commit.web_url.clone(),
            diffstat,
            patch_body,
        }))
    }
}

#[async_trait]
impl JobExecutor for GitLabCommitsExecutor {
    fn job_type(&self) -> PhysicalJobType {
        PhysicalJobType::GitlabCommits
    }

    async fn run_window(&self, cx: &ExecutionContext<'_>) -> Result<WindowOutcome, ExecutorError> {
        let now = Utc::now();
        let cursor_timestamp = cx.cursor_before.as_time().map(|(ts, _)| ts);

        let forward_window_seconds = {
            let mut windows = self.adaptive_windows.lock().unwrap();
            windows
                .entry(cx.repo.repo_id)
                .or_insert_with(|| {
                    AdaptiveWindowState::new(DEFAULT_FORWARD_WINDOW_SECONDS, MIN_WINDOW_SECONDS, MAX_WINDOW_SECONDS)
                })
                .current_window_seconds
        };

        let window = if cx.mode == scm_sync_core::SyncMode::Backfill {
            let since = cx.since_override.unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap());
            let until = cx.until_override.unwrap_or(now);
            crate::window::TimeWindow { since, until }
        } else {
            compute_time_window(cursor_timestamp, DEFAULT_OVERLAP_SECONDS, forward_window_seconds, now)
        };

        let per_page = cx.suggested_batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let project_id = &cx.repo.project_key;

        let mut unrecoverable = Vec::new();
        let mut fetched = Vec::new();

        let page = match self.client.list_commits(project_id, self.ref_name.as_deref(), window.since, window.until, per_page).await {
            Ok(commits) => commits,
            Err(e) => {
                if e.category == ErrorCategory::RateLimit {
                    self.adaptive_windows.lock().unwrap().entry(cx.repo.repo_id).and_modify(|w| w.shrink());
                }
                if is_unrecoverable_remote_error(&e) {
                    if cx.strict {
                        return Ok(WindowOutcome {
                            fatal: Some((e.category, e.message)),
                            ..WindowOutcome::empty()
                        });
                    }
                    unrecoverable.push(e.category);
                }
                Vec::new()
            }
        };
        fetched.extend(page);

        let deduped = deduplicate_commits(fetched, |c: &RemoteCommit| c.authored_date.unwrap_or(now), |c| c.sha.as_str(), cursor_timestamp);

        if (cx.should_abort)() {
            return Ok(WindowOutcome { aborted_for_lease_loss: true, ..WindowOutcome::empty() });
        }

        let mut records = Vec::with_capacity(deduped.len());
        let mut last_key: Option<(chrono::DateTime<Utc>, String)> = None;
        for commit in &deduped {
            if (cx.should_abort)() {
                return Ok(WindowOutcome {
                    counts: records_counts(&records),
                    aborted_for_lease_loss: true,
                    ..WindowOutcome::empty()
                });
            }
            if let Some(record) = self.build_record(cx.repo.repo_id, commit, project_id, &mut unrecoverable, cx.strict).await? {
                // `deduped` is sorted ascending, so the last record actually
                // built is the furthest-along fully-successful position
                //.
                last_key = Some((commit.authored_date.unwrap_or(now), commit.sha.clone()));
                records.push(record);
            }
        }

        let counts = records_counts(&records);

        if unrecoverable.is_empty() {
            self.adaptive_windows
                .lock()
                .unwrap()
                .entry(cx.repo.repo_id)
                .and_modify(|w| w.grow(deduped.len()));
        }

        if !records.is_empty() {
            self.sink.upsert_commits(&records).await.map_err(|e| ExecutorError::Remote(e.to_string()))?;
        }

        let candidate_cursor = last_key.map(|(ts, sha)| Cursor::time(ts, sha));

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

fn records_counts(records: &[GitCommitRecord]) -> RunCounts {
    let mut counts = RunCounts::new();
    counts.insert("commits".to_string(), serde_json::Value::from(records.len()));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MrStateFilter, RemoteApprovalEvent, RemoteDiffEntry, RemoteError, RemoteMergeRequest, RemoteNoteEvent, RemoteStateEvent};
    use scm_sync_core::{RepoId, RepoInfo, RepoType};
    use std::sync::Mutex;

    struct FakeClient {
        commits: Vec<RemoteCommit>,
        rate_limit_once: Mutex<bool>,
    }

    impl FakeClient {
        fn new(commits: Vec<RemoteCommit>) -> Self {
            Self { commits, rate_limit_once: Mutex::new(false) }
        }
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
        ) -> Result<Vec<RemoteCommit>, RemoteError> {
            let mut rate_limited = self.rate_limit_once.lock().unwrap();
            if *rate_limited {
                *rate_limited = false;
                return Err(RemoteError {
                    category: ErrorCategory::RateLimit,
                    message: "rate limited".to_string(),
                    status_code: Some(429),
                    retry_after: Some(60),
                });
            }
            Ok(self.commits.clone())
        }

        async fn get_commit_diff(&self, _project_id: &str, _sha: &str) -> Result<Vec<RemoteDiffEntry>, RemoteError> {
            Ok(vec![])
        }

        async fn list_merge_requests(
            &self,
            _project_id: &str,
            _state: MrStateFilter,
            _updated_after: chrono::DateTime<Utc>,
            _per_page: u32,
        ) -> Result<Vec<RemoteMergeRequest>, RemoteError> {
            Ok(vec![])
        }

        async fn list_mr_notes(&self, _project_id: &str, _mr_iid: i64) -> Result<Vec<RemoteNoteEvent>, RemoteError> {
            Ok(vec![])
        }

        async fn list_mr_approvals(&self, _project_id: &str, _mr_iid: i64) -> Result<Vec<RemoteApprovalEvent>, RemoteError> {
            Ok(vec![])
        }

        async fn list_mr_resource_state_events(
            &self,
            _project_id: &str,
            _mr_iid: i64,
        ) -> Result<Vec<RemoteStateEvent>, RemoteError> {
            Ok(vec![])
        }
    }

    struct FakeSink {
        commits: Mutex<Vec<GitCommitRecord>>,
    }

    #[async_trait]
    impl UpsertSink for FakeSink {
        async fn upsert_commits(&self, records: &[GitCommitRecord]) -> anyhow::Result<()> {
            self.commits.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
        async fn upsert_svn_revisions(&self, _records: &[crate::records::SvnRevisionRecord]) -> anyhow::Result<()> {
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
            repo_type: RepoType::Git,
            url: "https://gitlab.example.com/g/p".to_string(),
            project_key: "g/p".to_string(),
            default_branch: Some("main".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fetches_and_upserts_new_commits_advancing_cursor() {
        let commit = RemoteCommit {
            sha: "abc123".to_string(),
            author_name: "a".to_string(),
            author_email: "a@x.com".to_string(),
            authored_date: Some(Utc::now()),
            committer_name: "a".to_string(),
            committer_email: "a@x.com".to_string(),
            committed_date: Some(Utc::now()),
            message: "msg".to_string(),
            parent_ids: vec![],
            web_url: "https://x".to_string(),
            stats: serde_json::Map::new(),
        };
        let client = Arc::new(FakeClient::new(vec![commit]));
        let sink = Arc::new(FakeSink { commits: Mutex::new(Vec::new()) });
        let executor = GitLabCommitsExecutor::new(client, sink.clone());

        let repo = repo();
        let cursor = Cursor::Empty;
        let worker_id = scm_sync_core::WorkerId("w".to_string());
        let no_abort = || false;
        let cx = ExecutionContext {
            repo: &repo,
            job_type: PhysicalJobType::GitlabCommits,
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
        assert!(outcome.candidate_cursor.is_some());
        assert!(outcome.unrecoverable_errors.is_empty());
        assert_eq!(sink.commits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_shrinks_window_for_next_call_on_same_repo() {
        let client = Arc::new(FakeClient::new(vec![]));
        *client.rate_limit_once.lock().unwrap() = true;
        let sink = Arc::new(FakeSink { commits: Mutex::new(Vec::new()) });
        let executor = GitLabCommitsExecutor::new(client, sink);

        let repo = repo();
        let cursor = Cursor::Empty;
        let worker_id = scm_sync_core::WorkerId("w".to_string());
        let no_abort = || false;
        let cx = ExecutionContext {
            repo: &repo,
            job_type: PhysicalJobType::GitlabCommits,
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

        // First call hits the rate limit and shrinks the window; unrecoverable
        // is non-fatal in best-effort mode so the run still succeeds empty.
        let first = executor.run_window(&cx).await.unwrap();
        assert_eq!(first.unrecoverable_errors, vec![ErrorCategory::RateLimit]);

        let windows = executor.adaptive_windows.lock().unwrap();
        let state = windows.get(&repo.repo_id).unwrap();
        assert_eq!(state.current_window_seconds, DEFAULT_FORWARD_WINDOW_SECONDS / 2);
        assert_eq!(state.rate_limit_count, 1);
    }
}
