use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 2.0;
/// Upper bound for any configured or submitted delay, in seconds (about 136 years).
pub const MAX_DELAY_SECS: f64 = u32::MAX as f64;

/// Top-level config (deferd.toml + DEFERD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeferdConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Dispatcher and worker-pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on how long the dispatcher idles between queue checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of work callbacks running at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// A callback running longer than this is treated as a failed attempt.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// How long shutdown waits for in-flight executions before giving up.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Delay before a failed job becomes due again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Same delay after every failure.
    Fixed { delay_secs: f64 },

    /// `base_secs * 2^(retries - 1)`, capped at `max_secs`.
    Exponential { base_secs: f64, max_secs: f64 },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Fixed {
            delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

/// Settings for the gateway's built-in work callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_simulated_work_ms")]
    pub simulated_work_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            simulated_work_ms: default_simulated_work_ms(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}
fn default_job_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}
fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_simulated_work_ms() -> u64 {
    500
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.deferd/jobs.db", home)
}

impl DeferdConfig {
    /// Load config from a TOML file with DEFERD_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `DEFERD_SCHEDULER__MAX_CONCURRENCY=16`.
    /// A missing file is not an error: every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("DEFERD_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        let config: DeferdConfig = figment
            .extract()
            .map_err(|e| crate::error::DeferdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        use crate::error::DeferdError::Config;

        if self.scheduler.max_concurrency == 0 {
            return Err(Config("scheduler.max_concurrency must be at least 1".into()));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(Config("scheduler.poll_interval_ms must be positive".into()));
        }
        let in_range = |secs: f64| (0.0..=MAX_DELAY_SECS).contains(&secs);
        match self.retry.backoff {
            BackoffConfig::Fixed { delay_secs } if !in_range(delay_secs) => Err(Config(format!(
                "retry.backoff.delay_secs must be between 0 and {MAX_DELAY_SECS}"
            ))),
            BackoffConfig::Exponential {
                base_secs,
                max_secs,
            } if !in_range(base_secs) || !in_range(max_secs) || max_secs < base_secs => {
                Err(Config(format!(
                    "retry.backoff requires 0 <= base_secs <= max_secs <= {MAX_DELAY_SECS}"
                )))
            }
            _ => Ok(()),
        }
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.deferd/deferd.toml", home)
}
