//! Configuration types for taskdl
//!
//! The controller receives a [`Config`] snapshot at construction and never
//! mutates it. The config store that produced it (settings page, JSON file)
//! lives outside this crate; [`Config::from_json_str`] accepts its output.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (output, naming, limits)
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    /// Output directory (default: "downloads")
    #[serde(default = "default_download_path")]
    pub path: PathBuf,

    /// File naming template handed to the backend (default: "{create}_{desc}")
    #[serde(default = "default_naming_template")]
    pub naming_template: String,

    /// Maximum file name length in characters (default: 80)
    #[serde(default = "default_file_name_length")]
    pub file_name_length: usize,

    /// Maximum number of tasks running at once (default: 5)
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,

    /// Maximum items fetched per task, 0 = unlimited (default: 0)
    #[serde(default)]
    pub max_counts: u64,

    /// Connections a backend may open for one task (default: 5)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Items requested per page from the platform (default: 20)
    #[serde(default = "default_page_counts")]
    pub page_counts: usize,

    /// A task fails with a timeout when the backend reports nothing for this
    /// long (default: 30 seconds)
    #[serde(default = "default_timeout", with = "secs_serde")]
    pub timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            path: default_download_path(),
            naming_template: default_naming_template(),
            file_name_length: default_file_name_length(),
            max_tasks: default_max_tasks(),
            max_counts: 0,
            max_connections: default_max_connections(),
            page_counts: default_page_counts(),
            timeout: default_timeout(),
        }
    }
}

/// Proxy settings passed through to the backend
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Whether the proxy is used
    #[serde(default)]
    pub enabled: bool,

    /// Proxy URL, e.g. "http://127.0.0.1:7890"
    #[serde(default)]
    pub address: Option<String>,
}

impl ProxyConfig {
    /// Address to hand to the backend, if the proxy is enabled
    pub fn effective_address(&self) -> Option<&str> {
        if self.enabled {
            self.address.as_deref().filter(|a| !a.trim().is_empty())
        } else {
            None
        }
    }
}

/// Retry configuration for transient backend failures
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1000 ms)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay (default: 30000 ms)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier applied after each retry; 1.0 gives a fixed delay (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Orchestration tuning
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Minimum spacing between progress events for one task (default: 200 ms)
    #[serde(default = "default_progress_interval", with = "millis_serde")]
    pub progress_interval: Duration,

    /// How long a cancelled worker may take to stop before it is logged as
    /// a fault (default: 5000 ms)
    #[serde(default = "default_cancel_grace", with = "millis_serde")]
    pub cancel_grace: Duration,

    /// Event channel capacity; slow subscribers lag beyond this (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            progress_interval: default_progress_interval(),
            cancel_grace: default_cancel_grace(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Log verbosity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug
    Debug,
    /// Info
    #[default]
    Info,
    /// Warning
    #[serde(alias = "WARN")]
    Warning,
    /// Error
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Main configuration snapshot
///
/// Sub-configs:
/// - [`download`](DownloadConfig) - output, naming, limits, timeout (flattened)
/// - [`proxy`](ProxyConfig) - proxy passthrough
/// - [`retry`](RetryConfig) - backoff policy
/// - [`runtime`](RuntimeConfig) - progress coalescing, cancel grace, event buffer
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Proxy settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Orchestration tuning
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Log verbosity
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Config {
    /// Parse a snapshot produced by the config store and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Maximum number of concurrently active tasks
    pub fn max_concurrency(&self) -> usize {
        self.download.max_tasks
    }

    /// Check that every setting is usable
    pub fn validate(&self) -> Result<()> {
        let download = &self.download;
        if download.max_tasks == 0 {
            return Err(config_error("max_tasks", "must be at least 1"));
        }
        if download.max_connections == 0 {
            return Err(config_error("max_connections", "must be at least 1"));
        }
        if download.page_counts == 0 {
            return Err(config_error("page_counts", "must be at least 1"));
        }
        if download.file_name_length == 0 {
            return Err(config_error("file_name_length", "must be at least 1"));
        }
        if download.naming_template.trim().is_empty() {
            return Err(config_error("naming_template", "must not be empty"));
        }
        if download.path.as_os_str().is_empty() {
            return Err(config_error("path", "must not be empty"));
        }
        if download.timeout.is_zero() {
            return Err(config_error("timeout", "must be greater than zero"));
        }

        if self.proxy.enabled {
            let address = self
                .proxy
                .address
                .as_deref()
                .map(str::trim)
                .unwrap_or_default();
            if address.is_empty() {
                return Err(config_error(
                    "proxy.address",
                    "required when the proxy is enabled",
                ));
            }
            url::Url::parse(address)
                .map_err(|e| config_error("proxy.address", &format!("invalid URL: {}", e)))?;
        }

        let retry = &self.retry;
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(config_error("retry.backoff_multiplier", "must be >= 1.0"));
        }
        if retry.initial_delay > retry.max_delay {
            return Err(config_error(
                "retry.initial_delay",
                "must not exceed retry.max_delay",
            ));
        }

        if self.runtime.event_buffer == 0 {
            return Err(config_error("runtime.event_buffer", "must be at least 1"));
        }

        Ok(())
    }
}

fn config_error(key: &str, message: &str) -> Error {
    Error::Config {
        message: format!("{}: {}", key, message),
        key: Some(key.to_string()),
    }
}

// Default value functions
fn default_download_path() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_naming_template() -> String {
    "{create}_{desc}".to_string()
}

fn default_file_name_length() -> usize {
    80
}

fn default_max_tasks() -> usize {
    5
}

fn default_max_connections() -> usize {
    5
}

fn default_page_counts() -> usize {
    20
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_event_buffer() -> usize {
    1000
}

// Duration as (fractional) seconds
mod secs_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// Duration as whole milliseconds
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
