//! GitLab MR review-event sync: notes, approvals, and state events mapped
//! to the canonical event-type taxonomy. Multiple remote calls per MR
//! justify renewing the sync lock every N MRs rather than only once per
//! job, so this executor runs with a longer lock lease and its own renewal
//! cadence than the commit/MR executors.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use scm_sync_core::{
    build_approval_source_event_id, build_mr_id, build_review_source_event_id, classify_note, Cursor,
    PhysicalJobType, RemoteNote, ReviewSourceKind, RunCounts,
};

use crate::errors::ExecutorError;
use crate::records::{ReviewEventRecord, UpsertSink};
use crate::registry::{ExecutionContext, JobExecutor, WindowOutcome};
use crate::remote::{is_unrecoverable_remote_error, GitLabClient, MrStateFilter};
use crate::window::DEFAULT_OVERLAP_SECONDS;

const DEFAULT_BATCH_SIZE: u32 = 50;
/// Renew the sync lock every N MRs processed, independent of the queue
/// lease heartbeat.
pub const DEFAULT_RENEW_INTERVAL_MRS: u32 = 10;

pub struct GitLabReviewsExecutor {
    pub client: Arc<dyn GitLabClient>,
    pub sink: Arc<dyn UpsertSink>,
    pub include_merged: bool,
    pub include_closed: bool,
}

impl GitLabReviewsExecutor {
    pub fn new(client: Arc<dyn GitLabClient>, sink: Arc<dyn UpsertSink>) -> Self {
        Self { client, sink, include_merged: true, include_closed: true }
    }
}

#[async_trait]
impl JobExecutor for GitLabReviewsExecutor {
    fn job_type(&self) -> PhysicalJobType {
        PhysicalJobType::GitlabReviews
    }

    async fn run_window(&self, cx: &ExecutionContext<'_>) -> Result<WindowOutcome, ExecutorError> {
        let now = Utc::now();
        let cursor_timestamp = cx.cursor_before.as_time().map(|(ts, _)| ts);
        let updated_after = if cx.mode == scm_sync_core::SyncMode::Backfill {
            cx.since_override.unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap())
        } else {
            cursor_timestamp
                .map(|ts| ts - chrono::Duration::seconds(DEFAULT_OVERLAP_SECONDS))
                .unwrap_or_else(|| chrono::DateTime::from_timestamp(0, 0).unwrap())
        };

        let per_page = cx.suggested_batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let project_id = &cx.repo.project_key;
        let state_filter = match (self.include_merged, self.include_closed) {
            (true, true) => MrStateFilter::All,
            (true, false) => MrStateFilter::Merged,
            (false, true) => MrStateFilter::Closed,
            (false, false) => MrStateFilter::Opened,
        };

        let mut unrecoverable = Vec::new();

        let mrs = match self.client.list_merge_requests(project_id, state_filter, updated_after, per_page).await {
            Ok(mrs) => mrs,
            Err(e) => {
                if is_unrecoverable_remote_error(&e) {
                    if cx.strict {
                        return Ok(WindowOutcome { fatal: Some((e.category, e.message)), ..WindowOutcome::empty() });
                    }
                    unrecoverable.push(e.category);
                }
                Vec::new()
            }
        };

        let mut records = Vec::new();
        let mut last_key: Option<(chrono::DateTime<Utc>, String)> = None;

        for (i, mr) in mrs.iter().enumerate() {
            if (cx.should_abort)() {
                return Ok(WindowOutcome {
                    counts: review_counts(&records),
                    aborted_for_lease_loss: true,
                    ..WindowOutcome::empty()
                });
            }

            let mr_id = build_mr_id(cx.repo.repo_id, mr.iid);

            // Notes (comments, code comments, and the system notes GitLab
            // emits for assign/label/milestone/merge/close/reopen).
            match self.client.list_mr_notes(project_id, mr.iid).await {
                Ok(notes) => {
                    for note in notes {
                        let event_type = classify_note(&RemoteNote {
                            system: note.system,
                            body: &note.body,
                            has_position: note.has_position,
                        });
                        let ts = note.created_at.unwrap_or(now);
                        if let Some(cursor_ts) = cursor_timestamp {
                            if ts <= cursor_ts {
                                continue;
                            }
                        }
                        let source_event_id = build_review_source_event_id(ReviewSourceKind::Note, &note.id);
                        records.push(ReviewEventRecord {
                            repo_id: cx.repo.repo_id,
                            mr_id: mr_id.clone(),
                            source_event_id,
                            event_type,
                            actor_username: note.author_username.clone(),
                            actor_email: note.author_email.clone(),
                            ts,
                            synthetic_ts: note.created_at.is_none(),
                            payload: serde_json::Map::new(),
                        });
                        bump_key(&mut last_key, ts, &note.id);
                    }
                }
                Err(e) if is_unrecoverable_remote_error(&e) => {
                    if cx.strict {
                        return Ok(WindowOutcome {
                            fatal: Some((e.category, e.message)),
                            counts: review_counts(&records),
                            ..WindowOutcome::empty()
                        });
                    }
                    unrecoverable.push(e.category);
                }
                Err(_) => {}
            }

            // Approvals: the review type isn't a note at all on older GitLab
            // versions, so they're fetched from their own endpoint.
            if let Ok(approvals) = self.client.list_mr_approvals(project_id, mr.iid).await {
                for approval in approvals {
                    let ts = approval.created_at.unwrap_or(now);
                    if let Some(cursor_ts) = cursor_timestamp {
                        if ts <= cursor_ts {
                            continue;
                        }
                    }
                    let source_event_id = build_approval_source_event_id(&mr_id, &approval.user_id);
                    records.push(ReviewEventRecord {
                        repo_id: cx.repo.repo_id,
                        mr_id: mr_id.clone(),
                        source_event_id,
                        event_type: scm_sync_core::ReviewEventType::Approve,
                        actor_username: None,
                        actor_email: None,
                        ts,
                        synthetic_ts: approval.created_at.is_none(),
                        payload: serde_json::Map::new(),
                    });
                    bump_key(&mut last_key, ts, &approval.user_id);
                }
            }

            if let Ok(states) = self.client.list_mr_resource_state_events(project_id, mr.iid).await {
                for state_event in states {
                    let ts = state_event.created_at.unwrap_or(now);
                    if let Some(cursor_ts) = cursor_timestamp {
                        if ts <= cursor_ts {
                            continue;
                        }
                    }
                    let event_type = match state_event.state.as_str() {
                        "merged" => scm_sync_core::ReviewEventType::Merge,
                        "closed" => scm_sync_core::ReviewEventType::Close,
                        _ => scm_sync_core::ReviewEventType::Reopen,
                    };
                    let source_event_id = build_review_source_event_id(ReviewSourceKind::State, &state_event.id);
                    records.push(ReviewEventRecord {
                        repo_id: cx.repo.repo_id,
                        mr_id: mr_id.clone(),
                        source_event_id,
                        event_type,
                        actor_username: None,
                        actor_email: None,
                        ts,
                        synthetic_ts: state_event.created_at.is_none(),
                        payload: serde_json::Map::new(),
                    });
                    bump_key(&mut last_key, ts, &state_event.id);
                }
            }

            if (i as u32 + 1) % DEFAULT_RENEW_INTERVAL_MRS == 0 {
                match cx.locks.renew(cx.repo.repo_id, cx.job_type, cx.worker_id).await {
                    Ok(true) => {
                        tracing::debug!(processed = i + 1, %mr_id, "sync lock renewed");
                    }
                    Ok(false) => {
                        tracing::warn!(processed = i + 1, %mr_id, "sync lock renewal rejected, lease lost mid-run");
                        return Ok(WindowOutcome {
                            counts: review_counts(&records),
                            aborted_for_lease_loss: true,
                            ..WindowOutcome::empty()
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, processed = i + 1, %mr_id, "sync lock renewal failed, lease lost mid-run");
                        return Ok(WindowOutcome {
                            counts: review_counts(&records),
                            aborted_for_lease_loss: true,
                            ..WindowOutcome::empty()
                        });
                    }
                }
            }
        }

        let counts = review_counts(&records);
        if !records.is_empty() {
            self.sink.upsert_review_events(&records).await.map_err(|e| ExecutorError::Remote(e.to_string()))?;
        }

        let candidate_cursor = last_key.map(|(ts, id)| Cursor::time(ts, id));

        Ok(WindowOutcome {
            counts,
            candidate_cursor,
            unrecoverable_errors: unrecoverable,
            missing_types: Vec::new(),
            fatal: None,
            aborted_for_lease_loss: false,
        })
    }
}

fn bump_key(last_key: &mut Option<(chrono::DateTime<Utc>, String)>, ts: chrono::DateTime<Utc>, id: &str) {
    let candidate = (ts, id.to_string());
    if last_key.as_ref().map(|k| k < &candidate).unwrap_or(true) {
        *last_key = Some(candidate);
    }
}

fn review_counts(records: &[ReviewEventRecord]) -> RunCounts {
    let mut counts = RunCounts::new();
    counts.insert("review_events".to_string(), serde_json::Value::from(records.len()));
    counts
}
