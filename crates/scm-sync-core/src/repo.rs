//! The `Repository` entity and the "ensure repo" upsert operation
//!.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ids::{RepoId, RepoType};

#[derive(Debug, Clone, PartialEq)]
pub struct RepoInfo {
    pub repo_id: RepoId,
    pub repo_type: RepoType,
    pub url: String,
    pub project_key: String,
    pub default_branch: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Trims a repository URL and strips a trailing slash before uniqueness
/// comparison.
pub fn normalize_repo_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum RepoStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Upserts by `(repo_type, url)`, never deleting; returns the
    /// surrogate `repo_id` whether the row was inserted or already existed.
    async fn ensure_repo(
        &self,
        repo_type: RepoType,
        url: &str,
        project_key: &str,
        default_branch: Option<&str>,
    ) -> Result<RepoId, RepoStoreError>;

    async fn get(&self, repo_id: RepoId) -> Result<Option<RepoInfo>, RepoStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slash_and_whitespace() {
        assert_eq!(normalize_repo_url("  https://gitlab.example.com/g/p.git/ "), "https://gitlab.example.com/g/p.git");
    }

    #[test]
    fn leaves_clean_url_unchanged() {
        assert_eq!(normalize_repo_url("https://gitlab.example.com/g/p"), "https://gitlab.example.com/g/p");
    }
}
