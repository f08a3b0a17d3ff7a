use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tally_core::MissingAccountPolicy;

/// Base name of the config file picked up from the working directory.
pub const DEFAULT_CONFIG_NAME: &str = "tally";
/// Prefix of environment overrides, e.g. `TALLY_SIDECAR__BASE_URL`.
pub const ENV_PREFIX: &str = "TALLY";
pub const DEFAULT_SIDECAR_URL: &str = "http://127.0.0.1:8080/";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub sidecar: SidecarSettings,
    #[serde(default)]
    pub crawl: CrawlSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl TallyConfig {
    /// Load defaults, then the config file, then `TALLY_*` environment overrides.
    ///
    /// An explicit `path` must exist; without one, `tally.toml` in the working
    /// directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("invalid configuration")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SidecarSettings {
    #[serde(default = "default_sidecar_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before retry `k` is `k * backoff_step_ms`.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl SidecarSettings {
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            base_url: default_sidecar_url(),
            max_retries: default_max_retries(),
            backoff_step_ms: default_backoff_step_ms(),
            request_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlSettings {
    /// Log balanced heights at info instead of debug.
    #[serde(default)]
    pub log_successes: bool,
    #[serde(default)]
    pub missing_account_policy: MissingAccountPolicy,
    /// How often follow mode asks for the chain head once it has caught up.
    #[serde(default = "default_head_poll_interval_ms")]
    pub head_poll_interval_ms: u64,
}

impl CrawlSettings {
    pub fn head_poll_interval(&self) -> Duration {
        Duration::from_millis(self.head_poll_interval_ms)
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            log_successes: false,
            missing_account_policy: MissingAccountPolicy::default(),
            head_poll_interval_ms: default_head_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "unknown log format `{other}` (expected pretty, compact or json)"
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Optional JSON log file written alongside stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

fn default_sidecar_url() -> String {
    DEFAULT_SIDECAR_URL.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_step_ms() -> u64 {
    2_000
}

fn default_head_poll_interval_ms() -> u64 {
    6_000
}

fn default_log_level() -> String {
    "info".to_string()
}
