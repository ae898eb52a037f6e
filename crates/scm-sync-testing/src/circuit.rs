use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use scm_sync_core::{CircuitBreakerKey, CircuitBreakerState, CircuitBreakerStore, CircuitBreakerStoreError};

/// In-memory [`CircuitBreakerStore`]; a missing key loads as
/// `CircuitBreakerState::default()`, matching `PgCircuitBreakerStore`.
#[derive(Default)]
pub struct FakeCircuitBreakerStore {
    rows: Mutex<HashMap<CircuitBreakerKey, CircuitBreakerState>>,
}

impl FakeCircuitBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CircuitBreakerStore for FakeCircuitBreakerStore {
    async fn load(&self, key: &CircuitBreakerKey) -> Result<CircuitBreakerState, CircuitBreakerStoreError> {
        Ok(self.rows.lock().unwrap().get(key).cloned().unwrap_or_default())
    }

    async fn save(
        &self,
        key: &CircuitBreakerKey,
        state: &CircuitBreakerState,
    ) -> Result<(), CircuitBreakerStoreError> {
        self.rows.lock().unwrap().insert(key.clone(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scm_sync_core::BreakerState;

    #[tokio::test]
    async fn missing_key_loads_as_closed_default() {
        let store = FakeCircuitBreakerStore::new();
        let state = store.load(&CircuitBreakerKey::global("proj-a")).await.unwrap();
        assert_eq!(state.state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = FakeCircuitBreakerStore::new();
        let key = CircuitBreakerKey::pool("proj-a", "fast");
        let mut state = CircuitBreakerState::default();
        state.state = BreakerState::Open;
        store.save(&key, &state).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap().state, BreakerState::Open);
    }
}
