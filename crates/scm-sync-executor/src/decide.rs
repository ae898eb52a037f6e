//! Phase 9's cursor-advancement decision table.

use scm_sync_core::{should_advance, Cursor, ErrorCategory};

#[derive(Debug, Clone, PartialEq)]
pub struct CursorAdvanceDecision {
    pub advance: bool,
    pub reason: String,
}

fn format_categories(categories: &[ErrorCategory]) -> String {
    let mut seen: Vec<&'static str> = Vec::new();
    for category in categories {
        let s = category.as_str();
        if !seen.contains(&s) {
            seen.push(s);
        }
    }
    seen.join(",")
}

/// The five-row table, plus the strict-mode partial-success carve-out noted
/// right after it: `update_watermark=false` always wins (row 3); with no
/// unrecoverable errors, advance iff the candidate is strictly greater than
/// `old` (rows 1-2); with unrecoverable errors, the candidate cursor itself
/// already represents the last *fully successful* record (callers build it
/// that way, not the last attempted), so both modes advance to it when it
/// is ahead of `old` — best-effort because it degrades gracefully (row 4),
/// strict because "the executor may advance to the last fully successful
/// record's position" even though the run itself is still reported failed
/// (row 5 covers the no-progress-at-all case, where the candidate never
/// gets ahead of `old` and this reduces to no advance either way).
pub fn decide_cursor_advance(
    old: &Cursor,
    candidate: Option<&Cursor>,
    update_watermark: bool,
    strict: bool,
    unrecoverable: &[ErrorCategory],
) -> CursorAdvanceDecision {
    if !update_watermark {
        return CursorAdvanceDecision {
            advance: false,
            reason: "backfill_mode:update_watermark=false".to_string(),
        };
    }

    let candidate_advances = candidate.map(|c| should_advance(c, old)).unwrap_or(false);

    if unrecoverable.is_empty() {
        return if candidate_advances {
            CursorAdvanceDecision { advance: true, reason: "batch_complete".to_string() }
        } else {
            CursorAdvanceDecision { advance: false, reason: "watermark_unchanged".to_string() }
        };
    }

    let categories = format_categories(unrecoverable);
    if strict {
        CursorAdvanceDecision {
            advance: candidate_advances,
            reason: format!("strict_mode:unrecoverable_error_encountered:categories={categories}"),
        }
    } else if candidate_advances {
        CursorAdvanceDecision { advance: true, reason: format!("best_effort_with_errors:degraded={categories}") }
    } else {
        CursorAdvanceDecision { advance: false, reason: "watermark_unchanged".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> Cursor {
        Cursor::time(Utc.timestamp_opt(secs, 0).unwrap(), "sha")
    }

    #[test]
    fn clean_batch_advances() {
        let d = decide_cursor_advance(&ts(0), Some(&ts(10)), true, false, &[]);
        assert!(d.advance);
        assert_eq!(d.reason, "batch_complete");
    }

    #[test]
    fn clean_batch_with_no_new_records_is_a_noop() {
        let d = decide_cursor_advance(&ts(10), Some(&ts(10)), true, false, &[]);
        assert!(!d.advance);
        assert_eq!(d.reason, "watermark_unchanged");
    }

    #[test]
    fn backfill_without_watermark_update_never_advances() {
        let d = decide_cursor_advance(&ts(0), Some(&ts(10)), false, false, &[]);
        assert!(!d.advance);
        assert_eq!(d.reason, "backfill_mode:update_watermark=false");
    }

    #[test]
    fn best_effort_with_errors_advances_to_last_success() {
        let d = decide_cursor_advance(&ts(0), Some(&ts(10)), true, false, &[ErrorCategory::RateLimit]);
        assert!(d.advance);
        assert_eq!(d.reason, "best_effort_with_errors:degraded=rate_limit");
    }

    #[test]
    fn strict_mode_with_partial_success_advances_to_last_success() {
        // In strict mode with partial success, the executor may advance to
        // the last fully successful record's position (not the last
        // attempted). The run is still reported failed by the executor
        // driver (`status=Failed` whenever strict mode sees any
        // unrecoverable error), independent of this cursor decision.
        let d = decide_cursor_advance(&ts(0), Some(&ts(10)), true, true, &[ErrorCategory::RateLimit]);
        assert!(d.advance);
        assert_eq!(d.reason, "strict_mode:unrecoverable_error_encountered:categories=rate_limit");
    }

    #[test]
    fn strict_mode_with_no_successful_progress_never_advances() {
        // Nothing before the unrecoverable error landed a candidate ahead of
        // `old` — the all-records-failed case, not just "some error
        // happened somewhere in the batch".
        let d = decide_cursor_advance(&ts(10), Some(&ts(10)), true, true, &[ErrorCategory::RateLimit]);
        assert!(!d.advance);
        assert_eq!(d.reason, "strict_mode:unrecoverable_error_encountered:categories=rate_limit");

        let d = decide_cursor_advance(&ts(10), None, true, true, &[ErrorCategory::RateLimit]);
        assert!(!d.advance);
    }

    #[test]
    fn tie_at_cursor_is_a_noop_even_with_best_effort_errors() {
        let d = decide_cursor_advance(&ts(10), Some(&ts(10)), true, false, &[ErrorCategory::Timeout]);
        assert!(!d.advance);
        assert_eq!(d.reason, "watermark_unchanged");
    }
}
