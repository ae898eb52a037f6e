//! Identity types shared across the sync engine: repository/job/run
//! identities, the physical vs. logical job type distinction, and sync mode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Surrogate identity of a `Repository` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepoId(pub i64);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Surrogate identity of a `SyncJob` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a `SyncRun` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Surrogate identity of a `SyncLock` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockId(pub i64);

/// A worker's self-assigned identifier: `hostname-pid-shortuuid`, generated
/// once per process and reused for every claim/renew/ack it performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// `hostname[..16]-pid-uuid[..8]`, kept within a 24-32 char range by truncating the hostname component.
    pub fn generate() -> Self {
        let hostname = hostname_or_unknown();
        let truncated: String = hostname.chars().take(16).collect();
        let pid = std::process::id();
        let short = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self(format!("{truncated}-{pid}-{short}"))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn hostname_or_unknown() -> String {
    // std has no portable hostname accessor; callers on real hosts should
    // prefer the `hostname` crate, but the engine only needs a stable,
    // human-legible prefix, not the canonical FQDN.
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "worker".to_string())
}

/// `repos.repo_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Git,
    Svn,
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoType::Git => write!(f, "git"),
            RepoType::Svn => write!(f, "svn"),
        }
    }
}

impl FromStr for RepoType {
    type Err = UnknownRepoType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(RepoType::Git),
            "svn" => Ok(RepoType::Svn),
            other => Err(UnknownRepoType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown repo_type: {0}")]
pub struct UnknownRepoType(pub String);

/// The granularity at which locks and queues are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalJobType {
    GitlabCommits,
    GitlabMrs,
    GitlabReviews,
    Svn,
}

impl PhysicalJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhysicalJobType::GitlabCommits => "gitlab_commits",
            PhysicalJobType::GitlabMrs => "gitlab_mrs",
            PhysicalJobType::GitlabReviews => "gitlab_reviews",
            PhysicalJobType::Svn => "svn",
        }
    }
}

impl fmt::Display for PhysicalJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Legacy names kept for backward compatibility; these dispatch to a physical type based on `repo_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalJobType {
    Commits,
    Mrs,
    Reviews,
}

impl LogicalJobType {
    /// Resolve to a physical job type given the owning repository's type.
    /// `Mrs`/`Reviews` are git-only; callers must short-circuit SVN repos
    /// before reaching here (see `scm-sync-executor::registry`).
    pub fn resolve(self, repo_type: RepoType) -> Option<PhysicalJobType> {
        match (self, repo_type) {
            (LogicalJobType::Commits, RepoType::Git) => Some(PhysicalJobType::GitlabCommits),
            (LogicalJobType::Commits, RepoType::Svn) => Some(PhysicalJobType::Svn),
            (LogicalJobType::Mrs, RepoType::Git) => Some(PhysicalJobType::GitlabMrs),
            (LogicalJobType::Mrs, RepoType::Svn) => None,
            (LogicalJobType::Reviews, RepoType::Git) => Some(PhysicalJobType::GitlabReviews),
            (LogicalJobType::Reviews, RepoType::Svn) => None,
        }
    }
}

/// The job_type column accepts either spelling; the queue persists whichever
/// string it was given and the worker resolves it at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobType {
    Physical(PhysicalJobType),
    Logical(LogicalJobType),
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Physical(p) => p.as_str(),
            JobType::Logical(LogicalJobType::Commits) => "commits",
            JobType::Logical(LogicalJobType::Mrs) => "mrs",
            JobType::Logical(LogicalJobType::Reviews) => "reviews",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gitlab_commits" => Ok(JobType::Physical(PhysicalJobType::GitlabCommits)),
            "gitlab_mrs" => Ok(JobType::Physical(PhysicalJobType::GitlabMrs)),
            "gitlab_reviews" => Ok(JobType::Physical(PhysicalJobType::GitlabReviews)),
            "svn" => Ok(JobType::Physical(PhysicalJobType::Svn)),
            "commits" => Ok(JobType::Logical(LogicalJobType::Commits)),
            "mrs" => Ok(JobType::Logical(LogicalJobType::Mrs)),
            "reviews" => Ok(JobType::Logical(LogicalJobType::Reviews)),
            other => Err(UnknownJobType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown job_type: {0}")]
pub struct UnknownJobType(pub String);

/// `sync_jobs.mode` / `sync_runs.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Incremental,
    Backfill,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::Backfill => write!(f, "backfill"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_len_within_expected_range() {
        let id = WorkerId::generate();
        assert!(id.0.len() >= 3 && id.0.len() <= 48, "{}", id.0);
    }

    #[test]
    fn logical_commits_resolves_by_repo_type() {
        assert_eq!(
            LogicalJobType::Commits.resolve(RepoType::Git),
            Some(PhysicalJobType::GitlabCommits)
        );
        assert_eq!(
            LogicalJobType::Commits.resolve(RepoType::Svn),
            Some(PhysicalJobType::Svn)
        );
    }

    #[test]
    fn logical_mrs_skip_svn() {
        assert_eq!(LogicalJobType::Mrs.resolve(RepoType::Svn), None);
    }

    #[test]
    fn job_type_roundtrips_through_str() {
        for s in [
            "gitlab_commits",
            "gitlab_mrs",
            "gitlab_reviews",
            "svn",
            "commits",
            "mrs",
            "reviews",
        ] {
            let parsed: JobType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }
}
