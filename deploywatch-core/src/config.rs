//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/deploywatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/deploywatch/` (~/.config/deploywatch/)
//! - State/Logs: `$XDG_STATE_HOME/deploywatch/` (~/.local/state/deploywatch/)

use crate::error::{Error, Result};
use crate::time::DisplayZone;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log files are named `{prefix}.{YYYY-MM-DD}.{suffix}`.
pub(crate) const LOG_FILE_PREFIX: &str = "deploywatch";
pub(crate) const LOG_FILE_SUFFIX: &str = "log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Deployment server connection
    #[serde(default)]
    pub server: ServerConfig,

    /// Observation tuning (stream, polling heuristics)
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Timestamp display
    #[serde(default)]
    pub display: DisplayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Deployment server connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the deployment API (e.g., `http://deploy.internal:8000`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request (optional)
    pub api_token: Option<String>,

    /// Timeout for one-shot requests (log fetch, history) in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connect timeout in seconds; also the only timeout on the push channel
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ServerConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(Error::Config("server.base_url is required".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "server.base_url must start with http:// or https:// (got {url:?})"
            )));
        }
        if self.timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "server timeouts must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// Observation tuning
///
/// Defaults reproduce the backend's reference cadence: one poll per second,
/// five unchanged polls mean done, two minutes at most.
#[derive(Debug, Deserialize, Clone)]
pub struct ObserverConfig {
    /// Try the server-push channel before polling
    #[serde(default = "default_use_stream")]
    pub use_stream: bool,

    /// Seconds without any push event before the channel is treated as dropped
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Consecutive polls with an unchanged line count that count as completion
    #[serde(default = "default_stall_ticks")]
    pub stall_ticks: u32,

    /// Polls before giving up on a job that never resolves
    #[serde(default = "default_max_poll_ticks")]
    pub max_poll_ticks: u32,

    /// Failure score added by each failed fetch
    #[serde(default = "default_fetch_failure_weight")]
    pub fetch_failure_weight: u32,

    /// Failure score at which the job is declared failed
    #[serde(default = "default_fetch_failure_limit")]
    pub fetch_failure_limit: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            use_stream: default_use_stream(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            poll_interval_ms: default_poll_interval(),
            stall_ticks: default_stall_ticks(),
            max_poll_ticks: default_max_poll_ticks(),
            fetch_failure_weight: default_fetch_failure_weight(),
            fetch_failure_limit: default_fetch_failure_limit(),
        }
    }
}

impl ObserverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stream_idle_timeout_secs == 0 {
            return Err(Error::Config(
                "observer.stream_idle_timeout_secs must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "observer.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.stall_ticks == 0 || self.max_poll_ticks == 0 {
            return Err(Error::Config(
                "observer.stall_ticks and observer.max_poll_ticks must be positive".to_string(),
            ));
        }
        if self.fetch_failure_weight == 0 || self.fetch_failure_limit == 0 {
            return Err(Error::Config(
                "observer fetch failure weight and limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_use_stream() -> bool {
    true
}

fn default_stream_idle_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_stall_ticks() -> u32 {
    5
}

fn default_max_poll_ticks() -> u32 {
    120
}

fn default_fetch_failure_weight() -> u32 {
    5
}

fn default_fetch_failure_limit() -> u32 {
    20
}

/// Timestamp display configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    /// `"UTC"` or a fixed offset such as `"+09:00"`
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
        }
    }
}

impl DisplayConfig {
    pub fn zone(&self) -> Result<DisplayZone> {
        self.time_zone.parse()
    }
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.observer.validate()?;
        self.display.zone()?;
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/deploywatch/config.toml` (~/.config/deploywatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("deploywatch").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/deploywatch/` (~/.local/state/deploywatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("deploywatch")
    }

    /// Returns the log file for a given day
    ///
    /// Logs rotate at UTC midnight:
    /// `$XDG_STATE_HOME/deploywatch/deploywatch.YYYY-MM-DD.log`
    pub fn log_path_for(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }

    /// Returns the log file being written today
    pub fn log_path() -> PathBuf {
        Self::log_path_for(Utc::now().date_naive())
    }
}
