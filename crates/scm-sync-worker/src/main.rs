use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use scm_sync_core::pool::ClaimFilter;
use scm_sync_core::{CircuitBreakerController, PhysicalJobType, WorkerId};
use scm_sync_executor::protocol::{ExecutorDriver, ExecutorStores};
use scm_sync_postgres::{PgCircuitBreakerStore, PgCursorStore, PgJobQueue, PgRepoStore, PgSyncLockManager, PgSyncRunStore};
use scm_sync_worker::cli::Args;
use scm_sync_worker::{build_worker_circuit_breaker_key, executors, heartbeat, WorkerConfig, WorkerRuntime};

const EXIT_SUCCESS: i32 = 0;
/// Sync against a remote GitLab instance failed.
const EXIT_GITLAB_SYNC_ERROR: i32 = 11;
/// Repository checkout/artifact handling failed.
const EXIT_REPO_ERROR: i32 = 12;
/// Review-sync-specific failure.
const EXIT_REVIEW_SYNC_ERROR: i32 = 13;
const EXIT_UNEXPECTED_ERROR: i32 = 1;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("scm_sync_worker={filter_level},scm_sync_executor={filter_level},scm_sync_core={filter_level}"))),
        )
        .init();

    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "worker exited on an unexpected error");
            std::process::exit(EXIT_UNEXPECTED_ERROR);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let cfg = WorkerConfig::from_env(args.postgres_dsn.clone());
    let project_key = std::env::var("PROJECT_KEY").ok().filter(|v| !v.is_empty()).unwrap_or_else(|| "default".to_string());

    let worker_id = args
        .worker_id
        .clone()
        .or_else(|| cfg.worker_id.clone())
        .map(WorkerId)
        .unwrap_or_else(WorkerId::generate);

    let pool_file = args.config.as_deref().map(scm_sync_worker::PoolConfig::load).transpose()?;
    let pool_def = match (&args.pool, &pool_file) {
        (Some(name), Some(pools)) => pools.get(name).cloned(),
        (Some(name), None) => {
            anyhow::bail!("--pool {name} given without --config");
        }
        _ => None,
    };

    let job_types = resolve_job_types(&args, pool_def.as_ref())?;
    let instance_allowlist = if !args.instance_allowlist.is_empty() {
        args.instance_allowlist.clone()
    } else {
        pool_def.as_ref().map(|p| p.instance_allowlist.clone()).unwrap_or_default()
    };
    let tenant_allowlist = if !args.tenant_allowlist.is_empty() {
        args.tenant_allowlist.clone()
    } else {
        pool_def.as_ref().map(|p| p.tenant_allowlist.clone()).unwrap_or_default()
    };

    let filter = ClaimFilter {
        job_types: if job_types.is_empty() { None } else { Some(job_types) },
        instance_allowlist: if instance_allowlist.is_empty() { None } else { Some(instance_allowlist.clone()) },
        tenant_allowlist: if tenant_allowlist.is_empty() { None } else { Some(tenant_allowlist.clone()) },
    };

    let breaker_key = build_worker_circuit_breaker_key(&project_key, args.pool.as_deref(), &instance_allowlist, &tenant_allowlist);

    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(10).connect(&cfg.postgres_dsn).await?;

    let repos: Arc<dyn scm_sync_core::RepoStore> = Arc::new(PgRepoStore::new(pool.clone()));
    let cursors: Arc<dyn scm_sync_core::CursorStore> = Arc::new(PgCursorStore::new(pool.clone()));
    let locks: Arc<dyn scm_sync_core::SyncLockManager> = Arc::new(PgSyncLockManager::new(pool.clone()));
    let runs: Arc<dyn scm_sync_core::SyncRunStore> = Arc::new(PgSyncRunStore::new(pool.clone()));
    let circuits: Arc<dyn scm_sync_core::CircuitBreakerStore> = Arc::new(PgCircuitBreakerStore::new(pool.clone()));
    let queue: Arc<dyn scm_sync_core::JobQueue> = Arc::new(PgJobQueue::new(pool.clone()));

    let stores = ExecutorStores { repos: repos.clone(), cursors, locks, runs };
    let registry = executors::build_default_registry();
    let driver = Arc::new(ExecutorDriver::new(stores, registry));

    let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
    install_signal_handlers(shutdown.clone());

    let runtime = WorkerRuntime {
        worker_id,
        queue,
        repos,
        circuits,
        driver,
        breaker: CircuitBreakerController::default(),
        breaker_key,
        filter,
        lease_seconds: args.lease_seconds.unwrap_or(cfg.lease_seconds),
        renew_interval_seconds: args.renew_interval.unwrap_or(cfg.renew_interval_seconds),
        max_renew_failures: args.max_renew_failures.unwrap_or(cfg.max_renew_failures),
        poll_interval_seconds: args.poll_interval.unwrap_or(cfg.poll_interval_seconds),
        strict: cfg.sync_mode.is_strict(),
        shutdown,
    };

    let exit_code = if args.once {
        exit_code_for_outcome(runtime.run_once().await)
    } else {
        runtime.run_loop().await;
        EXIT_SUCCESS
    };

    Ok(exit_code)
}

fn resolve_job_types(args: &Args, pool_def: Option<&scm_sync_worker::PoolDefinition>) -> anyhow::Result<Vec<PhysicalJobType>> {
    let raw: Vec<String> = if !args.job_types.is_empty() {
        args.job_types.clone()
    } else {
        pool_def.map(|p| p.job_types.clone()).unwrap_or_default()
    };
    raw.iter()
        .map(|s| s.parse::<PhysicalJobType>().map_err(|_| anyhow::anyhow!("unknown job type '{s}'")))
        .collect()
}

/// Registers OS signal handlers that flip the shutdown flag and ask the
/// heartbeat currently in flight (if any) to renew once more immediately,
/// so an in-progress job's lease doesn't lapse mid-drain.
fn install_signal_handlers(shutdown: Arc<std::sync::atomic::AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.store(true, Ordering::SeqCst);
                    heartbeat::final_renew_current().await;
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
        tracing::info!("shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
        heartbeat::final_renew_current().await;
    });
}

/// Maps the one job `--once` ran (if any) to the process exit codes.
/// `run_loop` processes an unbounded mix of job types, so there
/// is no single "the" failure to report there — it always exits 0 and
/// leaves failure detail in `sync_runs`/`sync_jobs` instead; only `--once`
/// against a single claimed job has a meaningful 1:1 mapping.
fn exit_code_for_outcome(outcome: scm_sync_worker::worker_loop::JobOutcome) -> i32 {
    use scm_sync_worker::worker_loop::JobOutcome;
    match outcome {
        JobOutcome::NoJob | JobOutcome::Success { .. } => EXIT_SUCCESS,
        JobOutcome::Errored => EXIT_UNEXPECTED_ERROR,
        JobOutcome::Failed { job_type, .. } => match job_type {
            PhysicalJobType::GitlabCommits | PhysicalJobType::GitlabMrs => EXIT_GITLAB_SYNC_ERROR,
            PhysicalJobType::GitlabReviews => EXIT_REVIEW_SYNC_ERROR,
            PhysicalJobType::Svn => EXIT_REPO_ERROR,
        },
    }
}
