use async_trait::async_trait;
use scm_sync_core::{CircuitBreakerKey, CircuitBreakerState, CircuitBreakerStore, CircuitBreakerStoreError};
use sqlx::{PgPool, Row};

/// Serializes `CircuitBreakerState` as JSON per scope-key.
/// Lazily created: a missing row loads as `CircuitBreakerState::default()`.
#[derive(Clone)]
pub struct PgCircuitBreakerStore {
    pool: PgPool,
}

impl PgCircuitBreakerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CircuitBreakerStore for PgCircuitBreakerStore {
    async fn load(&self, key: &CircuitBreakerKey) -> Result<CircuitBreakerState, CircuitBreakerStoreError> {
        let row = sqlx::query("SELECT state FROM circuit_breaker_state WHERE scope_key = $1")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CircuitBreakerStoreError::Storage(e.into()))?;

        match row {
            None => Ok(CircuitBreakerState::default()),
            Some(row) => {
                let raw: serde_json::Value = row.get("state");
                serde_json::from_value(raw).map_err(|e| CircuitBreakerStoreError::Storage(e.into()))
            }
        }
    }

    async fn save(
        &self,
        key: &CircuitBreakerKey,
        state: &CircuitBreakerState,
    ) -> Result<(), CircuitBreakerStoreError> {
        let encoded = serde_json::to_value(state).map_err(|e| CircuitBreakerStoreError::Storage(e.into()))?;
        sqlx::query(
            r#"
            INSERT INTO circuit_breaker_state (scope_key, state)
            VALUES ($1, $2)
            ON CONFLICT (scope_key) DO UPDATE SET state = EXCLUDED.state
            "#,
        )
        .bind(key.to_string())
        .bind(encoded)
        .execute(&self.pool)
        .await
        .map_err(|e| CircuitBreakerStoreError::Storage(e.into()))?;
        Ok(())
    }
}
