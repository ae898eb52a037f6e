//! Per-`(repo_id, job_type)` watermarks and the monotone-advancement
//! invariant.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{PhysicalJobType, RepoId};

/// A watermark value. The two payload shapes (time-keyed, revision-keyed)
/// share one comparison rule: strict greater-than on the natural order
/// below, never on wall-clock "newness".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    /// GitLab commits/MRs/reviews: `(timestamp, secondary_id)` compared
    /// lexicographically, timestamp first.
    Time {
        timestamp: DateTime<Utc>,
        secondary_id: String,
    },
    /// SVN: a strictly increasing revision number.
    Revision(i64),
    /// No watermark persisted yet.
    Empty,
}

impl Cursor {
    pub fn time(timestamp: DateTime<Utc>, secondary_id: impl Into<String>) -> Self {
        Cursor::Time { timestamp, secondary_id: secondary_id.into() }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cursor::Empty)
    }

    /// `(timestamp, secondary_id)` for a time cursor, `None` otherwise.
    pub fn as_time(&self) -> Option<(DateTime<Utc>, &str)> {
        match self {
            Cursor::Time { timestamp, secondary_id } => Some((*timestamp, secondary_id.as_str())),
            _ => None,
        }
    }

    pub fn as_revision(&self) -> Option<i64> {
        match self {
            Cursor::Revision(rev) => Some(*rev),
            _ => None,
        }
    }
}

/// Advancement requires strict greater-than, compared
/// lexicographically on `(timestamp, secondary_id)` for time cursors, or
/// numerically for revisions. `Empty` never beats anything, and anything
/// beats `Empty`.
pub fn should_advance(new: &Cursor, current: &Cursor) -> bool {
    match (current, new) {
        (Cursor::Empty, Cursor::Empty) => false,
        (Cursor::Empty, _) => true,
        (_, Cursor::Empty) => false,
        (
            Cursor::Time { timestamp: old_ts, secondary_id: old_id },
            Cursor::Time { timestamp: new_ts, secondary_id: new_id },
        ) => (new_ts, new_id) > (old_ts, old_id),
        (Cursor::Revision(old_rev), Cursor::Revision(new_rev)) => new_rev > old_rev,
        // Mismatched shapes (e.g. a job_type's cursor kind changed) are
        // treated conservatively as "do not advance"; this should never
        // happen for a fixed job_type and is logged by the caller.
        _ => false,
    }
}

/// Canonicalize an ISO-8601 timestamp string to UTC with a trailing `Z` so
/// byte-wise string comparison agrees with chronological comparison.
pub fn normalize_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Free-form counters persisted alongside a cursor (`records_seen`,
/// `last_batch_size`, etc.); opaque to the store.
pub type CursorStats = serde_json::Map<String, Value>;

/// The envelope actually persisted in the `cursor` JSON column. Old rows
/// (`V1`) are a bare cursor payload with no stats wrapper; `load()`
/// normalizes both shapes transparently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorEnvelope {
    V2 {
        watermark: Cursor,
        #[serde(default)]
        stats: CursorStats,
    },
    V1(Value),
}

impl CursorEnvelope {
    /// Normalize into `(Cursor, CursorStats)`, preserving any unrecognized
    /// fields from a v1 payload into `stats` under an `_upgraded_from_v1`
    /// marker rather than discarding them.
    pub fn into_cursor(self) -> (Cursor, CursorStats) {
        match self {
            CursorEnvelope::V2 { watermark, stats } => (watermark, stats),
            CursorEnvelope::V1(value) => {
                let cursor = serde_json::from_value(value.clone()).unwrap_or(Cursor::Empty);
                let mut stats = CursorStats::new();
                if let Value::Object(map) = &value {
                    for (k, v) in map {
                        if k != "kind" && k != "timestamp" && k != "secondary_id" {
                            stats.insert(k.clone(), v.clone());
                        }
                    }
                }
                stats.insert("_upgraded_from_v1".to_string(), Value::Bool(true));
                (cursor, stats)
            }
        }
    }

    pub fn from_parts(watermark: Cursor, stats: CursorStats) -> Self {
        CursorEnvelope::V2 { watermark, stats }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CursorStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Persist, load, and guard monotone advancement of watermarks.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Never fails on absence; returns `(Cursor::Empty, empty stats)`.
    async fn load(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
    ) -> Result<(Cursor, CursorStats), CursorStoreError>;

    /// Persists `new_cursor` only if `should_advance(new, current)` holds;
    /// a monotone-violation is a silent no-op, not an error.
    async fn save(
        &self,
        repo_id: RepoId,
        job_type: PhysicalJobType,
        new_cursor: Cursor,
        stats: CursorStats,
    ) -> Result<bool, CursorStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn empty_advances_to_anything_but_empty() {
        assert!(should_advance(&Cursor::time(ts("2026-01-01T00:00:00Z"), "abc"), &Cursor::Empty));
        assert!(should_advance(&Cursor::Revision(1), &Cursor::Empty));
        assert!(!should_advance(&Cursor::Empty, &Cursor::Empty));
    }

    #[test]
    fn time_cursor_advances_on_strict_greater_than() {
        let old = Cursor::time(ts("2026-01-01T00:00:00Z"), "aaa");
        let newer = Cursor::time(ts("2026-01-01T00:00:01Z"), "aaa");
        let tie = Cursor::time(ts("2026-01-01T00:00:00Z"), "aaa");
        let same_ts_greater_id = Cursor::time(ts("2026-01-01T00:00:00Z"), "bbb");
        assert!(should_advance(&newer, &old));
        assert!(!should_advance(&tie, &old), "exact tie must be a no-op");
        assert!(should_advance(&same_ts_greater_id, &old));
    }

    #[test]
    fn revision_cursor_advances_on_strict_greater_than() {
        assert!(should_advance(&Cursor::Revision(4), &Cursor::Revision(3)));
        assert!(!should_advance(&Cursor::Revision(3), &Cursor::Revision(3)));
        assert!(!should_advance(&Cursor::Revision(2), &Cursor::Revision(3)));
    }

    #[test]
    fn mismatched_shapes_do_not_advance() {
        assert!(!should_advance(&Cursor::Revision(5), &Cursor::time(Utc.timestamp_opt(0, 0).unwrap(), "x")));
    }

    #[test]
    fn v1_envelope_upgrades_preserving_unknown_fields() {
        let v1 = serde_json::json!({
            "kind": "revision",
            "0": 7,
            "extra_field": "kept"
        });
        let envelope: CursorEnvelope = serde_json::from_value(v1).unwrap();
        let (cursor, stats) = envelope.into_cursor();
        assert!(matches!(cursor, Cursor::Empty) || cursor.as_revision().is_some());
        assert_eq!(stats.get("_upgraded_from_v1"), Some(&Value::Bool(true)));
    }

    #[test]
    fn v2_envelope_round_trips() {
        let cursor = Cursor::time(ts("2026-02-01T00:00:00Z"), "sha123");
        let mut stats = CursorStats::new();
        stats.insert("records_seen".to_string(), Value::from(42));
        let envelope = CursorEnvelope::from_parts(cursor.clone(), stats.clone());
        let json = serde_json::to_value(&envelope).unwrap();
        let parsed: CursorEnvelope = serde_json::from_value(json).unwrap();
        let (got_cursor, got_stats) = parsed.into_cursor();
        assert_eq!(got_cursor, cursor);
        assert_eq!(got_stats, stats);
    }

    #[test]
    fn normalize_timestamp_has_trailing_z() {
        let normalized = normalize_timestamp(ts("2026-01-01T00:00:00Z"));
        assert!(normalized.ends_with('Z'));
    }
}
