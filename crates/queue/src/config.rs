use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use genq_core::config::{env_opt, env_or};
use genq_core::ConfigError;
use genq_providers::BackoffConfig;

/// What the reconciler does with jobs that were in flight when the
/// previous process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Mark them `failed` with an interrupted error.
    #[default]
    Fail,
    /// Move them to the terminal `interrupted` status.
    Interrupt,
}

impl FromStr for RecoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "failed" => Ok(Self::Fail),
            "interrupt" | "interrupted" => Ok(Self::Interrupt),
            other => Err(format!("unknown recovery mode '{other}'")),
        }
    }
}

/// Queue runtime configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Slot capacity for jobs in `submitted`/`processing` (default: `3`).
    pub max_concurrent_jobs: u32,
    /// Poller tick interval (default: 2s).
    pub poll_interval: Duration,
    /// Outstanding poll calls per tick (default: `4`).
    pub max_concurrent_polls: usize,
    /// Transient poll errors tolerated before a job fails (default: `5`).
    pub max_poll_retries: u32,
    /// Backoff applied after transient poll errors.
    pub backoff: BackoffConfig,
    /// Maximum time since submission before a job times out (default: 10 min).
    pub max_wait: Duration,
    /// How long terminal jobs are kept (default: 1 h).
    pub retention: Duration,
    /// Coalescing window for snapshot writes (default: 250 ms).
    pub persist_debounce: Duration,
    /// Directory of the file snapshot store (default: `data/queue`).
    pub storage_dir: PathBuf,
    pub recovery_mode: RecoveryMode,
    /// Opening balance of the in-process credit ledger (default: `1000`).
    pub initial_credits: u64,
    /// Asset upload endpoint. Unset keeps provider URLs as-is.
    pub asset_store_url: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            poll_interval: Duration::from_millis(2000),
            max_concurrent_polls: 4,
            max_poll_retries: 5,
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(1000),
                max_delay: Duration::from_millis(30_000),
                multiplier: 2.0,
            },
            max_wait: Duration::from_secs(600),
            retention: Duration::from_secs(3600),
            persist_debounce: Duration::from_millis(250),
            storage_dir: PathBuf::from("data/queue"),
            recovery_mode: RecoveryMode::Fail,
            initial_credits: 1000,
            asset_store_url: None,
        }
    }
}

impl QueueConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default      |
    /// |-----------------------------|--------------|
    /// | `GENQ_MAX_CONCURRENT_JOBS`  | `3`          |
    /// | `GENQ_POLL_INTERVAL_MS`     | `2000`       |
    /// | `GENQ_MAX_CONCURRENT_POLLS` | `4`          |
    /// | `GENQ_MAX_POLL_RETRIES`     | `5`          |
    /// | `GENQ_BACKOFF_INITIAL_MS`   | `1000`       |
    /// | `GENQ_BACKOFF_MAX_MS`       | `30000`      |
    /// | `GENQ_MAX_WAIT_SECS`        | `600`        |
    /// | `GENQ_RETENTION_SECS`       | `3600`       |
    /// | `GENQ_PERSIST_DEBOUNCE_MS`  | `250`        |
    /// | `GENQ_STORAGE_DIR`          | `data/queue` |
    /// | `GENQ_RECOVERY_MODE`        | `fail`       |
    /// | `GENQ_INITIAL_CREDITS`      | `1000`       |
    /// | `GENQ_ASSET_STORE_URL`      | unset        |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let recovery_mode = match env_opt("GENQ_RECOVERY_MODE") {
            None => defaults.recovery_mode,
            Some(raw) => raw.parse().map_err(|_| ConfigError {
                key: "GENQ_RECOVERY_MODE".into(),
                expected: "recovery mode (fail|interrupt)",
                value: raw,
            })?,
        };

        Ok(Self {
            max_concurrent_jobs: env_or("GENQ_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?
                .max(1),
            poll_interval: Duration::from_millis(env_or("GENQ_POLL_INTERVAL_MS", 2000)?),
            max_concurrent_polls: env_or("GENQ_MAX_CONCURRENT_POLLS", defaults.max_concurrent_polls)?
                .max(1),
            max_poll_retries: env_or("GENQ_MAX_POLL_RETRIES", defaults.max_poll_retries)?,
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(env_or("GENQ_BACKOFF_INITIAL_MS", 1000)?),
                max_delay: Duration::from_millis(env_or("GENQ_BACKOFF_MAX_MS", 30_000)?),
                multiplier: defaults.backoff.multiplier,
            },
            max_wait: Duration::from_secs(env_or("GENQ_MAX_WAIT_SECS", 600)?),
            retention: Duration::from_secs(env_or("GENQ_RETENTION_SECS", 3600)?),
            persist_debounce: Duration::from_millis(env_or("GENQ_PERSIST_DEBOUNCE_MS", 250)?),
            storage_dir: env_opt("GENQ_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            recovery_mode,
            initial_credits: env_or("GENQ_INITIAL_CREDITS", defaults.initial_credits)?,
            asset_store_url: env_opt("GENQ_ASSET_STORE_URL"),
        })
    }
}
