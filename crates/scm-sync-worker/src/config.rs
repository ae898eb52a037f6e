//! Environment-sourced worker configuration and TOML pool definitions.

use std::collections::HashMap;

use serde::Deserialize;

const DEFAULT_LEASE_SECONDS: u64 = 300;
const DEFAULT_RENEW_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_MAX_RENEW_FAILURES: u32 = 3;
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrictness {
    Strict,
    BestEffort,
}

impl SyncStrictness {
    fn from_env(raw: &str) -> Self {
        match raw {
            "strict" => SyncStrictness::Strict,
            _ => SyncStrictness::BestEffort,
        }
    }

    pub fn is_strict(self) -> bool {
        self == SyncStrictness::Strict
    }
}

/// Process-lifetime worker settings, loaded once and cached for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub postgres_dsn: String,
    pub worker_id: Option<String>,
    pub poll_interval_seconds: u64,
    pub lease_seconds: u64,
    pub renew_interval_seconds: u64,
    pub max_renew_failures: u32,
    pub gitlab_token: Option<String>,
    pub sync_mode: SyncStrictness,
}

impl WorkerConfig {
    /// Reads `POSTGRES_DSN`, `WORKER_ID`, `POLL_INTERVAL`,
    /// `SCM_WORKER_LEASE_SECONDS`, `SCM_WORKER_RENEW_INTERVAL_SECONDS`,
    /// `SCM_WORKER_MAX_RENEW_FAILURES`, `GITLAB_TOKEN`/`GITLAB_PRIVATE_TOKEN`,
    /// `SCM_SYNC_MODE`. `POSTGRES_DSN` is the only variable
    /// without a default; its absence is an error raised by the caller, not
    /// here, since `clap`'s `env` attribute already surfaces a friendly
    /// message for a missing required argument.
    pub fn from_env(postgres_dsn: String) -> Self {
        Self {
            postgres_dsn,
            worker_id: env_nonempty("WORKER_ID"),
            poll_interval_seconds: env_parse("POLL_INTERVAL", DEFAULT_POLL_INTERVAL_SECONDS),
            lease_seconds: env_parse("SCM_WORKER_LEASE_SECONDS", DEFAULT_LEASE_SECONDS),
            renew_interval_seconds: env_parse("SCM_WORKER_RENEW_INTERVAL_SECONDS", DEFAULT_RENEW_INTERVAL_SECONDS),
            max_renew_failures: env_parse("SCM_WORKER_MAX_RENEW_FAILURES", DEFAULT_MAX_RENEW_FAILURES),
            gitlab_token: env_nonempty("GITLAB_TOKEN").or_else(|| env_nonempty("GITLAB_PRIVATE_TOKEN")),
            sync_mode: std::env::var("SCM_SYNC_MODE").ok().map(|v| SyncStrictness::from_env(&v)).unwrap_or(SyncStrictness::BestEffort),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// One `[scm.worker.pools.<name>]` section: a named, pre-declared claim
/// filter an operator selects with `--pool` instead of repeating
/// `--job-types`/`--instance-allowlist`/`--tenant-allowlist` on every
/// invocation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolDefinition {
    #[serde(default)]
    pub job_types: Vec<String>,
    #[serde(default)]
    pub instance_allowlist: Vec<String>,
    #[serde(default)]
    pub tenant_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PoolsSection {
    #[serde(default)]
    pools: HashMap<String, PoolDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WorkerSection {
    #[serde(default)]
    worker: PoolsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ScmSection {
    #[serde(default)]
    scm: WorkerSection,
}

/// The `[scm.worker.pools.*]` table of a pool-config TOML file.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    pub pools: HashMap<String, PoolDefinition>,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolConfigError {
    #[error("reading pool config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parsing pool config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl PoolConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, PoolConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: ScmSection = toml::from_str(&raw)?;
        Ok(PoolConfig { pools: parsed.scm.worker.pools })
    }

    pub fn get(&self, name: &str) -> Option<&PoolDefinition> {
        self.pools.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_parses_nested_sections() {
        let raw = r#"
            [scm.worker.pools.fast]
            job_types = ["gitlab_commits"]
            instance_allowlist = ["gitlab.example.com"]

            [scm.worker.pools.reviews]
            job_types = ["gitlab_reviews"]
            tenant_allowlist = ["tenant-a", "tenant-b"]
        "#;
        let parsed: ScmSection = toml::from_str(raw).unwrap();
        let config = PoolConfig { pools: parsed.scm.worker.pools };

        let fast = config.get("fast").unwrap();
        assert_eq!(fast.job_types, vec!["gitlab_commits"]);
        assert_eq!(fast.instance_allowlist, vec!["gitlab.example.com"]);

        let reviews = config.get("reviews").unwrap();
        assert_eq!(reviews.tenant_allowlist, vec!["tenant-a", "tenant-b"]);
        assert!(config.get("missing").is_none());
    }

    #[test]
    fn missing_pools_section_yields_empty_map() {
        let parsed: ScmSection = toml::from_str("").unwrap();
        assert!(parsed.scm.worker.pools.is_empty());
    }
}
