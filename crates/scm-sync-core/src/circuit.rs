//! Per-scope circuit breaker state machine.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// `<project_key>:global` or `<project_key>:pool:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CircuitBreakerKey {
    Global { project_key: String },
    Pool { project_key: String, pool_name: String },
}

impl CircuitBreakerKey {
    pub fn global(project_key: impl Into<String>) -> Self {
        CircuitBreakerKey::Global { project_key: project_key.into() }
    }

    pub fn pool(project_key: impl Into<String>, pool_name: impl Into<String>) -> Self {
        CircuitBreakerKey::Pool { project_key: project_key.into(), pool_name: pool_name.into() }
    }

    /// Tries the current `<project_key>:global` / `<project_key>:pool:<name>`
    /// shape first, then a legacy fallback (`<project_key>` alone is treated
    /// as the global scope) for back-compat with older persisted keys.
    pub fn parse(raw: &str) -> Self {
        if let Some((project_key, rest)) = raw.split_once(':') {
            if rest == "global" {
                return CircuitBreakerKey::Global { project_key: project_key.to_string() };
            }
            if let Some(pool_name) = rest.strip_prefix("pool:") {
                return CircuitBreakerKey::Pool {
                    project_key: project_key.to_string(),
                    pool_name: pool_name.to_string(),
                };
            }
        }
        CircuitBreakerKey::Global { project_key: raw.to_string() }
    }
}

impl fmt::Display for CircuitBreakerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerKey::Global { project_key } => write!(f, "{project_key}:global"),
            CircuitBreakerKey::Pool { project_key, pool_name } => {
                write!(f, "{project_key}:pool:{pool_name}")
            }
        }
    }
}

impl FromStr for CircuitBreakerKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CircuitBreakerKey::parse(s))
    }
}

/// The outcome fed to `record_result`; `LockHeld` is ignored entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    Failure(ErrorCategory),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: BreakerState,
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub failure_window: VecDeque<bool>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self { state: BreakerState::Closed, opened_at: None, failure_window: VecDeque::new() }
    }
}

/// What a `check()` call tells the worker loop to do before the next claim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitDecision {
    pub allow_sync: bool,
    pub wait_seconds: f64,
    /// Set when half-open/open and the caller should degrade: smaller
    /// batches, backfill-only.
    pub is_backfill_only: bool,
    pub suggested_batch_size: Option<u32>,
}

pub struct CircuitBreakerController {
    pub window_size: usize,
    pub failure_threshold: usize,
    pub cooldown_seconds: i64,
    pub degraded_batch_size: u32,
}

impl Default for CircuitBreakerController {
    fn default() -> Self {
        Self { window_size: 20, failure_threshold: 5, cooldown_seconds: 60, degraded_batch_size: 10 }
    }
}

impl CircuitBreakerController {
    /// Records one outcome into the sliding window and advances the state
    /// machine. `LockHeld` failures never reach here — callers must filter
    /// them out before calling `record_result`.
    pub fn record_result(
        &self,
        state: &mut CircuitBreakerState,
        outcome: SyncOutcome,
        now: DateTime<Utc>,
    ) {
        match (state.state, outcome) {
            (BreakerState::HalfOpen, SyncOutcome::Success) => {
                state.state = BreakerState::Closed;
                state.opened_at = None;
                state.failure_window.clear();
            }
            (BreakerState::HalfOpen, SyncOutcome::Failure(_)) => {
                state.state = BreakerState::Open;
                state.opened_at = Some(now);
                state.failure_window.clear();
            }
            (_, outcome) => {
                let is_failure = matches!(outcome, SyncOutcome::Failure(_));
                state.failure_window.push_back(is_failure);
                while state.failure_window.len() > self.window_size {
                    state.failure_window.pop_front();
                }
                let failures = state.failure_window.iter().filter(|f| **f).count();
                if state.state == BreakerState::Closed && failures >= self.failure_threshold {
                    state.state = BreakerState::Open;
                    state.opened_at = Some(now);
                }
            }
        }
    }

    /// `{allow_sync, wait_seconds}` plus a downgrade suggestion when
    /// half-open/open.
    pub fn check(&self, state: &CircuitBreakerState, now: DateTime<Utc>) -> CircuitDecision {
        match state.state {
            BreakerState::Closed => CircuitDecision {
                allow_sync: true,
                wait_seconds: 0.0,
                is_backfill_only: false,
                suggested_batch_size: None,
            },
            BreakerState::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                let elapsed = (now - opened_at).num_seconds();
                if elapsed >= self.cooldown_seconds {
                    CircuitDecision {
                        allow_sync: true,
                        wait_seconds: 0.0,
                        is_backfill_only: true,
                        suggested_batch_size: Some(self.degraded_batch_size),
                    }
                } else {
                    CircuitDecision {
                        allow_sync: false,
                        wait_seconds: (self.cooldown_seconds - elapsed) as f64,
                        is_backfill_only: true,
                        suggested_batch_size: Some(self.degraded_batch_size),
                    }
                }
            }
            BreakerState::HalfOpen => CircuitDecision {
                allow_sync: true,
                wait_seconds: 0.0,
                is_backfill_only: true,
                suggested_batch_size: Some(self.degraded_batch_size),
            },
        }
    }

    /// Transition `Open -> HalfOpen` once the cooldown has elapsed; the
    /// worker loop calls this immediately before `check()` on each poll.
    pub fn maybe_enter_half_open(&self, state: &mut CircuitBreakerState, now: DateTime<Utc>) {
        if state.state == BreakerState::Open {
            if let Some(opened_at) = state.opened_at {
                if (now - opened_at).num_seconds() >= self.cooldown_seconds {
                    state.state = BreakerState::HalfOpen;
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[async_trait]
pub trait CircuitBreakerStore: Send + Sync {
    /// Created lazily: a missing key loads as `CircuitBreakerState::default()`.
    async fn load(&self, key: &CircuitBreakerKey) -> Result<CircuitBreakerState, CircuitBreakerStoreError>;

    async fn save(
        &self,
        key: &CircuitBreakerKey,
        state: &CircuitBreakerState,
    ) -> Result<(), CircuitBreakerStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_display_and_parse() {
        let global = CircuitBreakerKey::global("proj-a");
        assert_eq!(global.to_string(), "proj-a:global");
        assert_eq!(CircuitBreakerKey::parse("proj-a:global"), global);

        let pool = CircuitBreakerKey::pool("proj-a", "fast-workers");
        assert_eq!(pool.to_string(), "proj-a:pool:fast-workers");
        assert_eq!(CircuitBreakerKey::parse("proj-a:pool:fast-workers"), pool);
    }

    #[test]
    fn legacy_key_shape_parses_as_global() {
        assert_eq!(CircuitBreakerKey::parse("bare-project-key"), CircuitBreakerKey::global("bare-project-key"));
    }

    #[test]
    fn closed_breaker_opens_after_threshold_failures() {
        let controller = CircuitBreakerController { failure_threshold: 3, ..Default::default() };
        let mut state = CircuitBreakerState::default();
        let now = Utc::now();
        for _ in 0..3 {
            controller.record_result(&mut state, SyncOutcome::Failure(ErrorCategory::Timeout), now);
        }
        assert_eq!(state.state, BreakerState::Open);
    }

    #[test]
    fn lock_held_outcomes_do_not_open_the_breaker() {
        let controller = CircuitBreakerController { failure_threshold: 1, ..Default::default() };
        let mut state = CircuitBreakerState::default();
        // Callers are expected to never call record_result for lock_held;
        // verify the breaker stays closed when only successes arrive.
        for _ in 0..5 {
            controller.record_result(&mut state, SyncOutcome::Success, Utc::now());
        }
        assert_eq!(state.state, BreakerState::Closed);
    }

    #[test]
    fn open_breaker_transitions_to_half_open_after_cooldown_then_closed_on_success() {
        let controller = CircuitBreakerController { cooldown_seconds: 10, ..Default::default() };
        let t0 = Utc::now();
        let mut state = CircuitBreakerState {
            state: BreakerState::Open,
            opened_at: Some(t0),
            failure_window: VecDeque::new(),
        };
        let later = t0 + chrono::Duration::seconds(11);
        controller.maybe_enter_half_open(&mut state, later);
        assert_eq!(state.state, BreakerState::HalfOpen);

        controller.record_result(&mut state, SyncOutcome::Success, later);
        assert_eq!(state.state, BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let controller = CircuitBreakerController::default();
        let mut state =
            CircuitBreakerState { state: BreakerState::HalfOpen, opened_at: None, failure_window: VecDeque::new() };
        controller.record_result(&mut state, SyncOutcome::Failure(ErrorCategory::RateLimit), Utc::now());
        assert_eq!(state.state, BreakerState::Open);
    }

    #[test]
    fn check_reflects_decision_by_state() {
        let controller = CircuitBreakerController::default();
        let closed = CircuitBreakerState::default();
        assert!(controller.check(&closed, Utc::now()).allow_sync);

        let open = CircuitBreakerState { state: BreakerState::Open, opened_at: Some(Utc::now()), failure_window: VecDeque::new() };
        let decision = controller.check(&open, Utc::now());
        assert!(!decision.allow_sync);
        assert!(decision.is_backfill_only);
    }
}
