//! Command-line surface for the worker binary.

use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(name = "scm-sync-worker", about = "Claims and executes SCM sync jobs")]
pub struct Args {
    /// Postgres connection string. Required; has no CLI-level default.
    #[arg(long, env = "POSTGRES_DSN")]
    pub postgres_dsn: String,

    /// Stable identifier for this process. Generated if omitted.
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// Restrict claims to these physical job types (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub job_types: Vec<String>,

    /// Name of a `[scm.worker.pools.<name>]` section in --config.
    #[arg(long)]
    pub pool: Option<String>,

    /// Restrict claims to jobs whose source instance is in this list.
    #[arg(long, value_delimiter = ',')]
    pub instance_allowlist: Vec<String>,

    /// Restrict claims to jobs whose tenant is in this list.
    #[arg(long, value_delimiter = ',')]
    pub tenant_allowlist: Vec<String>,

    /// Path to a TOML file holding `[scm.worker.pools.*]` definitions.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Process exactly one job and exit, instead of polling forever.
    #[arg(long, action = ArgAction::SetTrue)]
    pub once: bool,

    /// Poll forever (the default; present for symmetry with --once).
    #[arg(long = "loop", action = ArgAction::SetTrue)]
    pub loop_forever: bool,

    /// Seconds to sleep between empty polls.
    #[arg(long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Seconds a claimed job's lease is held for before it must be renewed.
    #[arg(long, env = "SCM_WORKER_LEASE_SECONDS")]
    pub lease_seconds: Option<u64>,

    /// Seconds between heartbeat lease renewals.
    #[arg(long, env = "SCM_WORKER_RENEW_INTERVAL_SECONDS")]
    pub renew_interval: Option<u64>,

    /// Consecutive renewal failures tolerated before a run is aborted.
    #[arg(long, env = "SCM_WORKER_MAX_RENEW_FAILURES")]
    pub max_renew_failures: Option<u32>,

    /// Verbose (debug-level) logging.
    #[arg(long, action = ArgAction::SetTrue)]
    pub debug: bool,
}
