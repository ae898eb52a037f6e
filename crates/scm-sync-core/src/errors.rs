//! The single shared error taxonomy. Every site that
//! catches a remote-API failure produces an [`ErrorCategory`] through
//! [`classify_last_error`] so the Queue, Reaper, Executor, and Worker Loop
//! agree on strict-mode and retry-backoff decisions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A categorized error tag, persisted alongside `last_error`/`error_summary`
/// and used to pick a retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // Permanent: mark_dead directly, never retried.
    AuthError,
    AuthMissing,
    AuthInvalid,
    PermissionDenied,
    RepoNotFound,
    RepoTypeUnknown,
    // Transient: fail_retry with a category-specific backoff.
    RateLimit,
    Timeout,
    Network,
    ServerError,
    Connection,
    LeaseLost,
    // Ignored: the claim was lost to another worker, not a failure.
    LockHeld,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::AuthError => "auth_error",
            ErrorCategory::AuthMissing => "auth_missing",
            ErrorCategory::AuthInvalid => "auth_invalid",
            ErrorCategory::PermissionDenied => "permission_denied",
            ErrorCategory::RepoNotFound => "repo_not_found",
            ErrorCategory::RepoTypeUnknown => "repo_type_unknown",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Connection => "connection",
            ErrorCategory::LeaseLost => "lease_lost",
            ErrorCategory::LockHeld => "lock_held",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "auth_error" => ErrorCategory::AuthError,
            "auth_missing" => ErrorCategory::AuthMissing,
            "auth_invalid" => ErrorCategory::AuthInvalid,
            "permission_denied" => ErrorCategory::PermissionDenied,
            "repo_not_found" => ErrorCategory::RepoNotFound,
            "repo_type_unknown" => ErrorCategory::RepoTypeUnknown,
            "rate_limit" => ErrorCategory::RateLimit,
            "timeout" => ErrorCategory::Timeout,
            "network" => ErrorCategory::Network,
            "server_error" => ErrorCategory::ServerError,
            "connection" => ErrorCategory::Connection,
            "lease_lost" => ErrorCategory::LeaseLost,
            "lock_held" => ErrorCategory::LockHeld,
            _ => return None,
        })
    }

    /// Permanent categories short-circuit the executor and go straight to
    /// `mark_dead`, independent of `attempts`.
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            ErrorCategory::AuthError
                | ErrorCategory::AuthMissing
                | ErrorCategory::AuthInvalid
                | ErrorCategory::PermissionDenied
                | ErrorCategory::RepoNotFound
                | ErrorCategory::RepoTypeUnknown
        )
    }

    /// Transient categories are retried with a category-specific backoff.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit
                | ErrorCategory::Timeout
                | ErrorCategory::Network
                | ErrorCategory::ServerError
                | ErrorCategory::Connection
                | ErrorCategory::LeaseLost
        )
    }

    /// `lock_held` is not a failure: the claim was lost to a concurrent
    /// worker and must not count toward `attempts`.
    pub fn is_ignored(self) -> bool {
        matches!(self, ErrorCategory::LockHeld)
    }

    /// Base backoff seconds for this transient category.
    pub fn base_backoff_seconds(self) -> u64 {
        match self {
            ErrorCategory::RateLimit => 120,
            ErrorCategory::Timeout => 30,
            ErrorCategory::Network => 60,
            ErrorCategory::ServerError => 90,
            ErrorCategory::Connection => 45,
            _ => DEFAULT_BACKOFF_SECONDS,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const DEFAULT_BACKOFF_SECONDS: u64 = 60;
pub const DEFAULT_BACKOFF_BASE: u64 = 60;
pub const DEFAULT_MAX_BACKOFF_SECONDS: u64 = 3600;
pub const DEFAULT_MAX_REAPER_BACKOFF_SECONDS: u64 = 1800;

/// Keyword groups scanned over a free-text error message, in priority order.
/// Order matters: a "504 Gateway Timeout" message contains both a
/// server-error status code and the word "timeout"; timeout wins.
const AUTH_KEYWORDS: &[&str] = &[
    "401",
    "unauthorized",
    "authentication failed",
    "auth_error",
    "auth error",
];
const REPO_NOT_FOUND_KEYWORDS: &[&str] = &["404", "not found", "repo_not_found"];
const PERMISSION_KEYWORDS: &[&str] = &["403", "forbidden", "permission_denied", "permission denied"];
const RATE_LIMIT_KEYWORDS: &[&str] = &["429", "rate limit", "too many requests"];
const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out"];
const SERVER_ERROR_KEYWORDS: &[&str] = &["502", "503", "bad gateway", "service unavailable"];
const NETWORK_KEYWORDS: &[&str] = &["network", "connection"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Infer a category purely from free-text keyword scanning. Used by
/// [`classify_last_error`] and as step 3 of [`resolve_backoff`].
pub fn classify_message(message: &str) -> Option<ErrorCategory> {
    let lower = message.to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if contains_any(&lower, AUTH_KEYWORDS) {
        return Some(ErrorCategory::AuthError);
    }
    if contains_any(&lower, REPO_NOT_FOUND_KEYWORDS) {
        return Some(ErrorCategory::RepoNotFound);
    }
    if contains_any(&lower, PERMISSION_KEYWORDS) {
        return Some(ErrorCategory::PermissionDenied);
    }
    if contains_any(&lower, RATE_LIMIT_KEYWORDS) {
        return Some(ErrorCategory::RateLimit);
    }
    if contains_any(&lower, TIMEOUT_KEYWORDS) {
        return Some(ErrorCategory::Timeout);
    }
    if contains_any(&lower, SERVER_ERROR_KEYWORDS) {
        return Some(ErrorCategory::ServerError);
    }
    if contains_any(&lower, NETWORK_KEYWORDS) {
        return Some(ErrorCategory::Network);
    }
    None
}

/// Classify a job's `last_error` text for the Reaper and Worker Loop.
/// Returns `(is_permanent, is_transient, category)`; an unclassifiable or
/// empty message yields `(false, false, None)`.
pub fn classify_last_error(last_error: Option<&str>) -> (bool, bool, Option<ErrorCategory>) {
    let message = last_error.unwrap_or("");
    match classify_message(message) {
        Some(category) => (category.is_permanent(), category.is_transient(), Some(category)),
        None => (false, false, None),
    }
}

/// Source for the backoff chosen by [`resolve_backoff`]; informational only,
/// surfaced for debugging/observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffSource {
    RetryAfter,
    ErrorCategory,
    Default,
}

/// Step 1-4 of the backoff resolution algorithm: pick an initial
/// (non-exponential) backoff for a freshly-failed job, preferring a
/// remote-provided `Retry-After` value.
pub fn resolve_backoff(
    retry_after: Option<u64>,
    error_category: Option<ErrorCategory>,
    error_message: Option<&str>,
) -> (u64, BackoffSource) {
    if let Some(seconds) = retry_after {
        return (seconds, BackoffSource::RetryAfter);
    }
    if let Some(category) = error_category {
        return (category.base_backoff_seconds(), BackoffSource::ErrorCategory);
    }
    if let Some(message) = error_message {
        if let Some(category) = classify_message(message) {
            return (category.base_backoff_seconds(), BackoffSource::ErrorCategory);
        }
    }
    (DEFAULT_BACKOFF_SECONDS, BackoffSource::Default)
}

/// Exponential backoff used by both the Queue's own retry scheduling and the
/// Reaper: `min(base * 2^(attempts-1), max)`. `attempts <= 0` is treated as
/// 1.
pub fn calculate_backoff_seconds(
    attempts: i64,
    base_seconds: u64,
    max_seconds: u64,
    error_category: Option<ErrorCategory>,
    error_message: Option<&str>,
) -> u64 {
    let base = error_category
        .map(ErrorCategory::base_backoff_seconds)
        .or_else(|| error_message.and_then(classify_message).map(|c| c.base_backoff_seconds()))
        .unwrap_or(base_seconds);
    let effective_attempts = attempts.max(1) as u32;
    let exponent = effective_attempts.saturating_sub(1).min(32);
    let scaled = base.saturating_mul(1u64 << exponent.min(20));
    scaled.min(max_seconds)
}

/// Redact bearer tokens, PATs, passwords, and query-string secrets from
/// text before it is persisted.
pub fn redact(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in redaction_patterns() {
        result = pattern.apply(&result);
    }
    result
}

struct RedactionPattern {
    /// Matches case-insensitively; `prefix` is kept, the secret value is
    /// replaced by `***REDACTED***`.
    marker: &'static str,
    stop_chars: &'static [char],
}

impl RedactionPattern {
    /// Scans `input` for case-insensitive occurrences of `marker`, keeping
    /// the marker itself but replacing everything up to the next
    /// `stop_chars` (or end of string) with a fixed placeholder.
    fn apply(&self, input: &str) -> String {
        let lower = input.to_lowercase();
        let marker_lower = self.marker.to_lowercase();
        let mut out = String::with_capacity(input.len());
        let mut pos = 0;
        while let Some(found) = lower[pos..].find(&marker_lower) {
            let marker_start = pos + found;
            let marker_end = marker_start + self.marker.len();
            out.push_str(&input[pos..marker_end]);
            let after = &input[marker_end..];
            let secret_len = after
                .find(|c: char| self.stop_chars.contains(&c))
                .unwrap_or(after.len());
            if secret_len > 0 {
                out.push_str("***REDACTED***");
            }
            pos = marker_end + secret_len;
        }
        out.push_str(&input[pos..]);
        out
    }
}

fn redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern { marker: "bearer ", stop_chars: &[' ', '\n', '\t', '"', '\''] },
        RedactionPattern { marker: "token=", stop_chars: &['&', ' ', '\n', '\t', '"', '\''] },
        RedactionPattern { marker: "private_token=", stop_chars: &['&', ' ', '\n', '\t', '"', '\''] },
        RedactionPattern { marker: "password=", stop_chars: &['&', ' ', '\n', '\t', '"', '\''] },
        RedactionPattern { marker: "glpat-", stop_chars: &[' ', '\n', '\t', '"', '\'', '&'] },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth_errors_are_permanent() {
        for msg in [
            "401 Unauthorized: Invalid token",
            "Authentication failed: token expired",
            "auth_error: invalid credentials",
        ] {
            let (is_permanent, is_transient, category) = classify_last_error(Some(msg));
            assert!(is_permanent, "{msg}");
            assert!(!is_transient, "{msg}");
            assert_eq!(category, Some(ErrorCategory::AuthError), "{msg}");
        }
    }

    #[test]
    fn classify_repo_not_found_is_permanent() {
        for msg in ["404 Not Found: repository does not exist", "repo_not_found: project deleted"] {
            let (is_permanent, is_transient, category) = classify_last_error(Some(msg));
            assert!(is_permanent, "{msg}");
            assert!(!is_transient, "{msg}");
            assert_eq!(category, Some(ErrorCategory::RepoNotFound), "{msg}");
        }
    }

    #[test]
    fn classify_permission_denied_is_permanent() {
        for msg in ["403 Forbidden: access denied", "permission_denied: insufficient rights"] {
            let (is_permanent, is_transient, category) = classify_last_error(Some(msg));
            assert!(is_permanent, "{msg}");
            assert!(!is_transient, "{msg}");
            assert_eq!(category, Some(ErrorCategory::PermissionDenied), "{msg}");
        }
    }

    #[test]
    fn classify_rate_limit_is_transient() {
        for msg in ["429 Too Many Requests", "Rate limit exceeded, retry after 60 seconds"] {
            let (is_permanent, is_transient, category) = classify_last_error(Some(msg));
            assert!(!is_permanent, "{msg}");
            assert!(is_transient, "{msg}");
            assert_eq!(category, Some(ErrorCategory::RateLimit), "{msg}");
        }
    }

    #[test]
    fn classify_timeout_wins_over_server_error_keyword() {
        let (is_permanent, is_transient, category) = classify_last_error(Some("504 Gateway Timeout"));
        assert!(!is_permanent);
        assert!(is_transient);
        assert_eq!(category, Some(ErrorCategory::Timeout));
    }

    #[test]
    fn classify_server_error() {
        for msg in ["502 Bad Gateway", "503 Service Unavailable"] {
            let (_, is_transient, category) = classify_last_error(Some(msg));
            assert!(is_transient, "{msg}");
            assert_eq!(category, Some(ErrorCategory::ServerError), "{msg}");
        }
    }

    #[test]
    fn classify_network_error() {
        let (is_permanent, is_transient, category) =
            classify_last_error(Some("Network error: connection refused"));
        assert!(!is_permanent);
        assert!(is_transient);
        assert_eq!(category, Some(ErrorCategory::Network));
    }

    #[test]
    fn classify_empty_and_none_are_unclassified() {
        for msg in [None, Some("")] {
            let (is_permanent, is_transient, category) = classify_last_error(msg);
            assert!(!is_permanent);
            assert!(!is_transient);
            assert_eq!(category, None);
        }
    }

    #[test]
    fn classify_unknown_error_is_unclassified() {
        let (is_permanent, is_transient, category) =
            classify_last_error(Some("Some unknown internal error occurred"));
        assert!(!is_permanent);
        assert!(!is_transient);
        assert_eq!(category, None);
    }

    #[test]
    fn backoff_formula_matches_expected_sequence() {
        // base=60, max=3600, attempts 1..6 -> 60,120,240,480,960,1920; 7+ -> 3600
        let expected = [60, 120, 240, 480, 960, 1920];
        for (i, want) in expected.iter().enumerate() {
            let attempts = (i + 1) as i64;
            let got = calculate_backoff_seconds(attempts, 60, 3600, None, None);
            assert_eq!(got, *want, "attempts={attempts}");
        }
        assert_eq!(calculate_backoff_seconds(7, 60, 3600, None, None), 3600);
        assert_eq!(calculate_backoff_seconds(20, 60, 3600, None, None), 3600);
    }

    #[test]
    fn backoff_treats_nonpositive_attempts_as_one() {
        assert_eq!(calculate_backoff_seconds(0, 60, 3600, None, None), 60);
        assert_eq!(calculate_backoff_seconds(-5, 60, 3600, None, None), 60);
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(calculate_backoff_seconds(4, 60, 300, None, None), 300);
    }

    #[test]
    fn resolve_backoff_prefers_retry_after() {
        let (secs, source) = resolve_backoff(Some(17), Some(ErrorCategory::Timeout), None);
        assert_eq!(secs, 17);
        assert_eq!(source, BackoffSource::RetryAfter);
    }

    #[test]
    fn resolve_backoff_falls_back_to_category_then_message_then_default() {
        let (secs, source) = resolve_backoff(None, Some(ErrorCategory::RateLimit), None);
        assert_eq!((secs, source), (120, BackoffSource::ErrorCategory));

        let (secs, source) = resolve_backoff(None, None, Some("connection refused"));
        assert_eq!((secs, source), (45, BackoffSource::ErrorCategory));

        let (secs, source) = resolve_backoff(None, None, Some("totally unknown"));
        assert_eq!((secs, source), (DEFAULT_BACKOFF_SECONDS, BackoffSource::Default));
    }

    #[test]
    fn redaction_strips_bearer_tokens() {
        let text = "request failed: Bearer abc.def.ghi rejected";
        let redacted = redact(text);
        assert!(!redacted.contains("abc.def.ghi"));
        assert!(redacted.contains("***REDACTED***"));
    }

    #[test]
    fn redaction_strips_gitlab_pats() {
        let text = "auth error using glpat-aBcDeFgH1234 for project";
        let redacted = redact(text);
        assert!(!redacted.contains("aBcDeFgH1234"));
    }

    #[test]
    fn redaction_strips_query_string_tokens() {
        let text = "GET https://gitlab.example.com/api?private_token=s3cr3t&x=1";
        let redacted = redact(text);
        assert!(!redacted.contains("s3cr3t"));
        assert!(redacted.contains("x=1"));
    }

    #[test]
    fn redaction_is_noop_on_clean_text() {
        let text = "connection refused to gitlab.example.com";
        assert_eq!(redact(text), text);
    }
}
