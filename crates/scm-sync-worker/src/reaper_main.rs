//! Standalone reaper process: a periodically-invoked recovery pass over
//! `sync_jobs`, `sync_runs`, and `sync_locks`, run either once (`--once`,
//! e.g. from cron) or in a loop (the default) with a fixed interval
//! between passes. Unlike `scm-sync-worker`, this binary never claims or
//! executes a job itself.

use clap::Parser;
use scm_sync_postgres::{JobRecoveryPolicy, Reaper, ReaperConfig};

#[derive(Debug, Parser)]
#[command(name = "scm-sync-reaper", about = "Recovers jobs, runs, and locks orphaned by dead workers")]
struct Args {
    /// Postgres connection string.
    #[arg(long, env = "POSTGRES_DSN")]
    postgres_dsn: String,

    /// Run a single pass and exit, instead of looping forever.
    #[arg(long)]
    once: bool,

    /// Seconds between passes when looping.
    #[arg(long, default_value_t = 60)]
    interval_seconds: u64,

    /// Extra slack beyond a row's own lease before it's considered expired.
    #[arg(long, default_value_t = 60)]
    grace_seconds: u64,

    /// What to do with an expired job whose last error doesn't classify as
    /// permanent or transient.
    #[arg(long, value_enum, default_value = "to_failed")]
    policy: JobRecoveryPolicy,

    /// Base backoff (seconds) used when the reaper itself schedules a retry.
    #[arg(long, default_value_t = 60)]
    retry_delay_seconds: u64,

    /// Multiplier applied to the computed backoff for transient failures.
    #[arg(long, default_value_t = 1.0)]
    transient_retry_delay_multiplier: f64,

    /// Cap on the backoff the reaper will ever schedule.
    #[arg(long, default_value_t = 1800)]
    max_reaper_backoff_seconds: u64,

    /// Max age of a `running` sync_runs row before it's considered abandoned.
    #[arg(long, default_value_t = 3600)]
    run_max_duration_seconds: u64,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("scm_sync_reaper={filter_level},scm_sync_postgres={filter_level}"))),
        )
        .init();

    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(5).connect(&args.postgres_dsn).await?;
    let reaper = Reaper::new(pool);

    let config = ReaperConfig {
        policy: args.policy,
        retry_delay_seconds: args.retry_delay_seconds,
        transient_retry_delay_multiplier: args.transient_retry_delay_multiplier,
        max_reaper_backoff_seconds: args.max_reaper_backoff_seconds,
        run_max_duration_seconds: args.run_max_duration_seconds,
        grace_seconds: args.grace_seconds,
    };

    if args.once {
        let report = reaper.run_once(&config).await;
        tracing::info!(
            jobs_processed = report.jobs.processed,
            jobs_to_failed = report.jobs.to_failed,
            jobs_to_dead = report.jobs.to_dead,
            jobs_to_pending = report.jobs.to_pending,
            runs_reaped = report.runs.to_failed,
            locks_released = report.locks.released,
            "reaper pass complete"
        );
        return Ok(());
    }

    let mut shutdown = std::pin::pin!(shutdown_signal());
    loop {
        let report = reaper.run_once(&config).await;
        tracing::info!(
            jobs_processed = report.jobs.processed,
            jobs_to_failed = report.jobs.to_failed,
            jobs_to_dead = report.jobs.to_dead,
            jobs_to_pending = report.jobs.to_pending,
            runs_reaped = report.runs.to_failed,
            locks_released = report.locks.released,
            "reaper pass complete"
        );

        tokio::select! {
            _ = tokio::time::sleep(tokio::time::Duration::from_secs(args.interval_seconds)) => {}
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, reaper exiting");
                break;
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
