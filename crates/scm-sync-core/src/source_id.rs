//! Canonical `<kind>:<repo_id>:<natural_id>` cross-entity linkage
//!.

use crate::ids::RepoId;

pub fn build_git_commit_source_id(repo_id: RepoId, commit_sha: &str) -> String {
    format!("git:{repo_id}:{commit_sha}")
}

pub fn build_svn_revision_source_id(repo_id: RepoId, rev_num: i64) -> String {
    format!("svn:{repo_id}:{rev_num}")
}

pub fn build_mr_source_id(repo_id: RepoId, mr_iid: i64) -> String {
    format!("mr:{repo_id}:{mr_iid}")
}

/// `mrs.mr_id`: `"<repo_id>:<mr_iid>"`, shared verbatim by the MR-sync and
/// review-sync paths.
pub fn build_mr_id(repo_id: RepoId, mr_iid: i64) -> String {
    format!("{repo_id}:{mr_iid}")
}

/// Review events inherit their MR's identity plus `<kind>:<id>` where
/// `kind` is `note`, `approval`, or `state`.
pub fn build_review_source_event_id(kind: ReviewSourceKind, id: &str) -> String {
    format!("{}:{id}", kind.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewSourceKind {
    Note,
    Approval,
    State,
}

impl ReviewSourceKind {
    fn as_str(self) -> &'static str {
        match self {
            ReviewSourceKind::Note => "note",
            ReviewSourceKind::Approval => "approval",
            ReviewSourceKind::State => "state",
        }
    }
}

/// `approval:<mr_id>:<user_id>`.
pub fn build_approval_source_event_id(mr_id: &str, user_id: &str) -> String {
    format!("approval:{mr_id}:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_source_id_format() {
        assert_eq!(build_git_commit_source_id(RepoId(42), "abc123"), "git:42:abc123");
    }

    #[test]
    fn svn_source_id_format() {
        assert_eq!(build_svn_revision_source_id(RepoId(7), 99), "svn:7:99");
    }

    #[test]
    fn mr_id_matches_across_sync_paths() {
        // build_mr_id(42, 7) must equal "42:7" regardless of caller.
        assert_eq!(build_mr_id(RepoId(42), 7), "42:7");
    }

    #[test]
    fn approval_source_event_id_format() {
        assert_eq!(build_approval_source_event_id("42:7", "u9"), "approval:42:7:u9");
    }

    #[test]
    fn note_and_state_source_event_ids() {
        assert_eq!(build_review_source_event_id(ReviewSourceKind::Note, "123"), "note:123");
        assert_eq!(build_review_source_event_id(ReviewSourceKind::State, "456"), "state:456");
    }
}
