pub mod cli;
pub mod config;
pub mod executors;
pub mod heartbeat;
pub mod worker_loop;

pub use config::{PoolConfig, PoolConfigError, PoolDefinition, SyncStrictness, WorkerConfig};
pub use heartbeat::HeartbeatManager;
pub use worker_loop::{build_worker_circuit_breaker_key, WorkerError, WorkerRuntime};
