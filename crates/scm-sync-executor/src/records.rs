//! Typed upsert shapes handed to the logbook's own storage layer (the
//! destination tables themselves live outside this workspace — executors
//! only need somewhere to put what they fetched).

use chrono::{DateTime, Utc};
use scm_sync_core::RepoId;

#[derive(Debug, Clone)]
pub struct GitCommitRecord {
    pub repo_id: RepoId,
    pub source_id: String,
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_at: Option<DateTime<Utc>>,
    pub committer_name: String,
    pub committer_email: String,
    pub committed_at: Option<DateTime<Utc>>,
    /// Set when `committed_at` could not be parsed and was substituted
    /// with the sync's own `Utc::now()` (DESIGN.md open-question
    /// resolution, mirrored from the MR-approval case).
    pub synthetic_ts: bool,
    pub message: String,
    pub parent_shas: Vec<String>,
    pub web_url: String,
    pub diffstat: Option<String>,
    pub patch_body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SvnRevisionRecord {
    pub repo_id: RepoId,
    pub source_id: String,
    pub rev_num: i64,
    pub author: String,
    pub message: String,
    pub committed_at: Option<DateTime<Utc>>,
    pub synthetic_ts: bool,
    pub diff_body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MrRecord {
    pub repo_id: RepoId,
    pub mr_id: String,
    pub iid: i64,
    pub title: String,
    pub description: String,
    pub state: String,
    pub source_branch: String,
    pub target_branch: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub web_url: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReviewEventRecord {
    pub repo_id: RepoId,
    pub mr_id: String,
    pub source_event_id: String,
    pub event_type: scm_sync_core::ReviewEventType,
    pub actor_username: Option<String>,
    pub actor_email: Option<String>,
    pub ts: DateTime<Utc>,
    pub synthetic_ts: bool,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Where an executor writes what it fetched. A real binary backs this with
/// the logbook's Postgres tables; tests back it with an in-memory sink.
#[async_trait::async_trait]
pub trait UpsertSink: Send + Sync {
    async fn upsert_commits(&self, records: &[GitCommitRecord]) -> anyhow::Result<()>;
    async fn upsert_svn_revisions(&self, records: &[SvnRevisionRecord]) -> anyhow::Result<()>;
    async fn upsert_mrs(&self, records: &[MrRecord]) -> anyhow::Result<()>;
    async fn upsert_review_events(&self, records: &[ReviewEventRecord]) -> anyhow::Result<()>;
}
