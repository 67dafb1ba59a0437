use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub github: GithubConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("pinmonl.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Number of parallel workers claiming jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Executions allowed per job before it is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long an idle worker sleeps before polling again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before the first retry; doubles on every further attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Re-crawl monls older than this. 0 disables periodic re-crawling.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_retry_base_delay_ms() -> u64 {
    2000
}
fn default_retry_max_delay_ms() -> u64 {
    60 * 60 * 1000
}
fn default_refresh_interval_secs() -> u64 {
    24 * 60 * 60
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Personal access tokens, rotated by the credential pool.
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Value `remaining` is reset to once a rate-limit window has passed.
    #[serde(default = "default_rate_limit_ceiling")]
    pub rate_limit_ceiling: i64,

    /// Process-wide request pacing, independent of per-token quotas.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Longest a fetch waits for a free, non-exhausted token.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_acquire_poll_ms")]
    pub acquire_poll_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_rate_limit_ceiling() -> i64 {
    5000
}
fn default_requests_per_second() -> u32 {
    10
}
fn default_acquire_timeout_ms() -> u64 {
    10_000
}
fn default_acquire_poll_ms() -> u64 {
    100
}

impl GithubConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn acquire_poll(&self) -> Duration {
        Duration::from_millis(self.acquire_poll_ms)
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            api_url: default_github_api_url(),
            tokens: Vec::new(),
            rate_limit_ceiling: default_rate_limit_ceiling(),
            requests_per_second: default_requests_per_second(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            acquire_poll_ms: default_acquire_poll_ms(),
        }
    }
}
