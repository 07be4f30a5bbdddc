//! Typed queue configuration.
//!
//! A [`QueueConfig`] is built once and passed by value to the queue and the
//! worker; nothing reads configuration from globals afterwards. Sources are
//! the builder, environment variables, or a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::codec::CodecKind;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

pub const ENV_DB: &str = "LOWQ_DB";
pub const ENV_CODEC: &str = "LOWQ_CODEC";
pub const ENV_MAX_RETRIES: &str = "LOWQ_MAX_RETRIES";
pub const ENV_BACKOFF_MS: &str = "LOWQ_BACKOFF_MS";
pub const ENV_LOG: &str = "LOWQ_LOG";
pub const ENV_LOG_FILE: &str = "LOWQ_LOG_FILE";
/// Set on detached worker processes; see [`crate::worker::run_if_worker`].
pub const ENV_WORKER: &str = "LOWQ_WORKER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// SQLite database holding the backlog and status tables.
    pub path: PathBuf,
    pub codec: CodecKind,
    pub retry: RetryPolicy,
    /// tracing level for processes started from this config (`silent` for none).
    pub log_level: String,
    /// Where a detached worker's stderr goes. Discarded when `None`.
    pub log_file: Option<PathBuf>,
}

impl QueueConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            codec: CodecKind::default(),
            retry: RetryPolicy::default(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }

    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Load configuration from environment variables.
    ///
    /// `LOWQ_DB` is required. In local dev, call `dotenvy::dotenv().ok()`
    /// before this.
    pub fn from_env() -> Result<Self> {
        let config = Self::new(required_var(ENV_DB)?).with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the optional `LOWQ_*` variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(codec) = optional_var(ENV_CODEC) {
            self.codec = codec.parse()?;
        }
        if let Some(retries) = optional_var(ENV_MAX_RETRIES) {
            self.retry.max_retries = parse_var(ENV_MAX_RETRIES, &retries)?;
        }
        if let Some(ms) = optional_var(ENV_BACKOFF_MS) {
            self.retry.step = Duration::from_millis(parse_var(ENV_BACKOFF_MS, &ms)?);
        }
        if let Some(level) = optional_var(ENV_LOG).or_else(|| optional_var("LOG_LEVEL")) {
            self.log_level = level;
        }
        if let Some(file) = optional_var(ENV_LOG_FILE) {
            self.log_file = Some(PathBuf::from(file));
        }
        Ok(self)
    }

    /// Load configuration from a TOML file.
    ///
    /// The result is not validated; `path` may be left for the caller to
    /// fill in before handing the config to a queue.
    ///
    /// ```toml
    /// path = "/var/lib/thumbs/queue.db"
    /// codec = "json"
    /// max_retries = 20
    /// backoff_ms = 100
    /// log_level = "info"
    /// log_file = "/var/log/thumbs-worker.log"
    /// ```
    pub fn from_file(file: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(file).map_err(|e| {
            Error::Config(format!("cannot read config {}: {e}", file.display()))
        })?;
        let raw: FileConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", file.display())))?;

        let defaults = RetryPolicy::default();
        let config = Self {
            path: raw.path.unwrap_or_default(),
            codec: raw.codec.unwrap_or_default(),
            retry: RetryPolicy {
                max_retries: raw.max_retries.unwrap_or(defaults.max_retries),
                step: raw
                    .backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.step),
            },
            log_level: raw.log_level.unwrap_or_else(|| "info".to_string()),
            log_file: raw.log_file,
        };
        Ok(config)
    }

    /// Reject configurations no queue can run with.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config("queue database path is not set".to_string()));
        }
        if self.retry.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// On-disk shape of the TOML config. Every key is optional so a file can
/// hold only overrides and take its path from the command line.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    path: Option<PathBuf>,
    codec: Option<CodecKind>,
    max_retries: Option<u32>,
    backoff_ms: Option<u64>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("invalid {name}={value:?}: {e}")))
}
