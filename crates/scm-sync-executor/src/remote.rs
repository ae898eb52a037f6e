//! Remote collaborator trait boundaries: the concrete
//! GitLab HTTP client and `svn` process wrapper are external and out of
//! scope. These traits are the thin seam the executors call through; a
//! production binary supplies a `reqwest`/`std::process::Command`-backed
//! implementation, tests supply an in-memory one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scm_sync_core::ErrorCategory;

/// One classified remote-call failure. Every GitLab/SVN call site maps its
/// transport error into this shape so the rest of the engine branches on an
/// enum, never on a caught exception.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub category: ErrorCategory,
    pub message: String,
    pub status_code: Option<u16>,
    pub retry_after: Option<u64>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

/// Rate-limit, timeout, any HTTP error, and any 5xx status are treated as
/// unrecoverable for the purposes of strict/best-effort batch handling.
/// Everything else (a single commit's diff 404ing, say) is swallowed by the
/// caller's own degrade path instead of reaching this check.
pub fn is_unrecoverable_remote_error(error: &RemoteError) -> bool {
    if error.category == ErrorCategory::RateLimit || error.status_code == Some(429) {
        return true;
    }
    if error.category == ErrorCategory::Timeout {
        return true;
    }
    if let Some(status) = error.status_code {
        if (500..=599).contains(&status) {
            return true;
        }
    }
    matches!(error.category, ErrorCategory::Network | ErrorCategory::Connection | ErrorCategory::ServerError)
}

#[derive(Debug, Clone, Default)]
pub struct RemoteCommit {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_date: Option<DateTime<Utc>>,
    pub committer_name: String,
    pub committer_email: String,
    pub committed_date: Option<DateTime<Utc>>,
    pub message: String,
    pub parent_ids: Vec<String>,
    pub web_url: String,
    /// `{additions, deletions, total}`, already summed by GitLab — used as
    /// the ministat fallback when a full diff can't be fetched.
    pub stats: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RemoteDiffEntry {
    pub old_path: String,
    pub new_path: String,
    pub diff: String,
    pub new_file: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MrStateFilter {
    All,
    Opened,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteMergeRequest {
    pub iid: i64,
    pub title: String,
    pub description: String,
    pub state: String,
    pub author_user_id: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub web_url: String,
    pub labels: Vec<String>,
    pub raw: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RemoteNoteEvent {
    pub id: String,
    pub system: bool,
    pub body: String,
    pub has_position: bool,
    pub author_username: Option<String>,
    pub author_email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RemoteApprovalEvent {
    pub user_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RemoteStateEvent {
    pub id: String,
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// List/detail operations needed by the three GitLab executors.
#[async_trait]
pub trait GitLabClient: Send + Sync {
    async fn list_commits(
        &self,
        project_id: &str,
        ref_name: Option<&str>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        per_page: u32,
    ) -> Result<Vec<RemoteCommit>, RemoteError>;

    async fn get_commit_diff(&self, project_id: &str, sha: &str) -> Result<Vec<RemoteDiffEntry>, RemoteError>;

    async fn list_merge_requests(
        &self,
        project_id: &str,
        state: MrStateFilter,
        updated_after: DateTime<Utc>,
        per_page: u32,
    ) -> Result<Vec<RemoteMergeRequest>, RemoteError>;

    async fn list_mr_notes(&self, project_id: &str, mr_iid: i64) -> Result<Vec<RemoteNoteEvent>, RemoteError>;

    async fn list_mr_approvals(&self, project_id: &str, mr_iid: i64) -> Result<Vec<RemoteApprovalEvent>, RemoteError>;

    async fn list_mr_resource_state_events(
        &self,
        project_id: &str,
        mr_iid: i64,
    ) -> Result<Vec<RemoteStateEvent>, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct SvnRevision {
    pub rev_num: i64,
    pub author: String,
    pub message: String,
    pub committed_at: Option<DateTime<Utc>>,
}

/// `svn log --xml -r N:HEAD --limit L` / `svn diff -c N`.
#[async_trait]
pub trait SvnClient: Send + Sync {
    async fn log(&self, start_rev: i64, limit: u32) -> Result<Vec<SvnRevision>, RemoteError>;

    async fn diff(&self, rev_num: i64) -> Result<String, RemoteError>;
}
