//! Diff fetching degrade modes and the commit dedup/sort rule shared by
//! the GitLab commit executor.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Fetch the full patch for every commit; a single failure is
    /// unrecoverable for that commit (but not necessarily the batch).
    Always,
    /// Fetch the full patch; on failure fall back to a ministat summary
    /// built from the commit's own additions/deletions/total counts.
    BestEffort,
    /// Never fetch patches; commits are stored with no diff content.
    None,
}

impl DiffMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffMode::Always => "always",
            DiffMode::BestEffort => "best_effort",
            DiffMode::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "always" => DiffMode::Always,
            "best_effort" => DiffMode::BestEffort,
            "none" => DiffMode::None,
            _ => return None,
        })
    }
}

/// `generate_ministat_from_stats`: the degrade summary written in place of
/// a full patch when `DiffMode::BestEffort` can't fetch one. Format is
/// fixed so downstream consumers can parse it without a schema bump.
pub fn generate_ministat(short_sha: &str, additions: u64, deletions: u64, total: u64) -> String {
    format!(
        "ministat [{short_sha}] degraded: {total} file(s) changed, {additions} insertion(s)(+), {deletions} deletion(s)(-)"
    )
}

/// A commit's sort/dedup key: `(timestamp, sha)` ascending, matching
/// `_get_commit_sort_key` exactly — secondary ordering by sha keeps the
/// sort stable when two commits share a timestamp to the second.
pub fn commit_sort_key(timestamp: DateTime<Utc>, sha: &str) -> (DateTime<Utc>, String) {
    (timestamp, sha.to_string())
}

/// `_deduplicate_commits`: sort by `(timestamp, sha)` ascending, drop
/// anything not strictly after `cursor_timestamp` (ties at the cursor are
/// already-seen, not new), then keep only the first occurrence of each
/// sha (GitLab's pagination can hand back the same commit across two
/// overlapping pages).
pub fn deduplicate_commits<T>(
    mut commits: Vec<T>,
    timestamp_of: impl Fn(&T) -> DateTime<Utc>,
    sha_of: impl Fn(&T) -> &str,
    cursor_timestamp: Option<DateTime<Utc>>,
) -> Vec<T> {
    commits.sort_by(|a, b| {
        commit_sort_key(timestamp_of(a), sha_of(a)).cmp(&commit_sort_key(timestamp_of(b), sha_of(b)))
    });

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(commits.len());
    for commit in commits {
        if let Some(cursor_ts) = cursor_timestamp {
            if timestamp_of(&commit) <= cursor_ts {
                continue;
            }
        }
        if seen.insert(sha_of(&commit).to_string()) {
            out.push(commit);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Commit {
        sha: &'static str,
        ts: DateTime<Utc>,
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn ministat_format_matches_fixed_shape() {
        let got = generate_ministat("abc1234", 3, 1, 4);
        assert_eq!(got, "ministat [abc1234] degraded: 4 file(s) changed, 3 insertion(s)(+), 1 deletion(s)(-)");
    }

    #[test]
    fn dedup_sorts_ascending_and_drops_at_or_before_cursor() {
        let commits = vec![
            Commit { sha: "c", ts: ts(30) },
            Commit { sha: "a", ts: ts(10) },
            Commit { sha: "b", ts: ts(20) },
        ];
        let out = deduplicate_commits(commits, |c| c.ts, |c| c.sha, Some(ts(10)));
        let shas: Vec<&str> = out.iter().map(|c| c.sha).collect();
        assert_eq!(shas, vec!["b", "c"]);
    }

    #[test]
    fn dedup_keeps_first_seen_sha_across_duplicate_pages() {
        let commits = vec![
            Commit { sha: "a", ts: ts(10) },
            Commit { sha: "a", ts: ts(10) },
            Commit { sha: "b", ts: ts(20) },
        ];
        let out = deduplicate_commits(commits, |c| c.ts, |c| c.sha, None);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn diff_mode_round_trips_through_str() {
        for mode in [DiffMode::Always, DiffMode::BestEffort, DiffMode::None] {
            assert_eq!(DiffMode::parse(mode.as_str()), Some(mode));
        }
    }
}
