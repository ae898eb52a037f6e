//! Fetch-window computation shared across executors: overlap-adjusted
//! time windows for the GitLab executors and an equivalent overlap in
//! revisions for SVN.

use chrono::{DateTime, Duration, Utc};

/// Default overlap applied to every time-cursor window so a record whose
/// remote `updated_at` ticks over mid-fetch is re-seen rather than
/// permanently skipped.
pub const DEFAULT_OVERLAP_SECONDS: i64 = 300;
pub const DEFAULT_FORWARD_WINDOW_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// `compute_commit_fetch_window`: with no prior cursor, fall back to the
/// Unix epoch rather than "now" so a fresh repo's full history is in
/// scope; otherwise step back `overlap_seconds` from the cursor and step
/// forward `forward_window_seconds`, clamped so `until` never exceeds
/// `now`.
pub fn compute_time_window(
    cursor_timestamp: Option<DateTime<Utc>>,
    overlap_seconds: i64,
    forward_window_seconds: i64,
    now: DateTime<Utc>,
) -> TimeWindow {
    let base = cursor_timestamp.unwrap_or_else(|| DateTime::from_timestamp(0, 0).expect("epoch is valid"));
    let since = base - Duration::seconds(overlap_seconds);
    let mut until = since + Duration::seconds(forward_window_seconds);
    if until > now {
        until = now;
    }
    TimeWindow { since, until }
}

/// SVN's revision-cursor equivalent of the overlap window: re-examine the
/// last `overlap_revs` already-seen revisions in case a commit's metadata
/// was amended (`svn propset` on a historical revision), matching the
/// commit path's timestamp overlap.
pub fn compute_revision_start(cursor_rev: i64, overlap_revs: i64) -> i64 {
    (cursor_rev - overlap_revs + 1).max(1)
}

/// `AdaptiveWindowState`: shrinks the forward window under sustained rate
/// limiting and grows it back once traffic is clean, bounded to
/// `[min_window_seconds, max_window_seconds]`.
#[derive(Debug, Clone)]
pub struct AdaptiveWindowState {
    pub current_window_seconds: i64,
    pub min_window_seconds: i64,
    pub max_window_seconds: i64,
    pub shrink_factor: f64,
    pub grow_factor: f64,
    pub commit_threshold: usize,
    pub rate_limit_count: u32,
}

impl AdaptiveWindowState {
    pub fn new(initial_window_seconds: i64, min_window_seconds: i64, max_window_seconds: i64) -> Self {
        Self {
            current_window_seconds: initial_window_seconds,
            min_window_seconds,
            max_window_seconds,
            shrink_factor: 0.5,
            grow_factor: 1.5,
            commit_threshold: 500,
            rate_limit_count: 0,
        }
    }

    /// Halves the window (never below `min_window_seconds`) and records a
    /// rate-limit hit.
    pub fn shrink(&mut self) {
        let shrunk = (self.current_window_seconds as f64 * self.shrink_factor) as i64;
        self.current_window_seconds = shrunk.max(self.min_window_seconds);
        self.rate_limit_count += 1;
    }

    /// Grows the window by `grow_factor` (never above `max_window_seconds`)
    /// when a batch came back under `commit_threshold` records, signalling
    /// there's headroom.
    pub fn grow(&mut self, records_in_batch: usize) {
        if records_in_batch >= self.commit_threshold {
            return;
        }
        let grown = (self.current_window_seconds as f64 * self.grow_factor) as i64;
        self.current_window_seconds = grown.min(self.max_window_seconds);
    }

    pub fn record_rate_limit(&mut self) {
        self.rate_limit_count += 1;
    }

    pub fn reset_rate_limit_count(&mut self) {
        self.rate_limit_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn no_cursor_falls_back_to_epoch() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let window = compute_time_window(None, 300, 3600, now);
        assert_eq!(window.since, DateTime::from_timestamp(0, 0).unwrap() - Duration::seconds(300));
    }

    #[test]
    fn window_applies_overlap_and_forward_span() {
        let cursor = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let window = compute_time_window(Some(cursor), 300, 3600, now);
        assert_eq!(window.since, cursor - Duration::seconds(300));
        assert_eq!(window.until, cursor - Duration::seconds(300) + Duration::seconds(3600));
    }

    #[test]
    fn window_clamps_until_to_now() {
        let cursor = Utc.with_ymd_and_hms(2026, 1, 1, 23, 50, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let window = compute_time_window(Some(cursor), 0, 3600, now);
        assert_eq!(window.until, now);
    }

    #[test]
    fn revision_start_clamps_to_one() {
        assert_eq!(compute_revision_start(5, 10), 1);
        assert_eq!(compute_revision_start(100, 10), 91);
    }

    #[test]
    fn adaptive_window_shrinks_and_grows_within_bounds() {
        let mut state = AdaptiveWindowState::new(3600, 300, 7200);
        state.shrink();
        assert_eq!(state.current_window_seconds, 1800);
        assert_eq!(state.rate_limit_count, 1);

        state.grow(10);
        assert_eq!(state.current_window_seconds, 2700);

        for _ in 0..10 {
            state.shrink();
        }
        assert_eq!(state.current_window_seconds, state.min_window_seconds);
    }

    #[test]
    fn adaptive_window_does_not_grow_past_threshold_batch() {
        let mut state = AdaptiveWindowState::new(3600, 300, 7200);
        state.grow(500);
        assert_eq!(state.current_window_seconds, 3600);
    }
}
