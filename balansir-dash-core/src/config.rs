use chrono::{FixedOffset, Offset, Utc};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::RollingWindow;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub windows: WindowsConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Balansir dashboard root, without a trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Polls allowed in flight at once; further ticks are skipped
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_bulk_load_attempts")]
    pub bulk_load_max_attempts: u32,

    #[serde(default = "default_bulk_load_delay")]
    pub bulk_load_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    #[serde(default = "default_minor_window")]
    pub minor_window_ms: i64,

    #[serde(default = "default_rolling_window")]
    pub default_rolling_window: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CalendarConfig {
    /// Offset from UTC used for calendar days and time-of-day arithmetic.
    /// Unset means UTC; the CLI fills in the host's offset instead.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

fn default_base_url() -> String {
    "http://localhost:8080/balansir".to_string()
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_connect_timeout() -> u64 {
    500
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_in_flight() -> usize {
    4
}

fn default_bulk_load_attempts() -> u32 {
    3
}

fn default_bulk_load_delay() -> u64 {
    250
}

fn default_minor_window() -> i64 {
    60_000
}

fn default_rolling_window() -> String {
    "1m".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            max_in_flight: default_max_in_flight(),
            bulk_load_max_attempts: default_bulk_load_attempts(),
            bulk_load_retry_delay_ms: default_bulk_load_delay(),
        }
    }
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            minor_window_ms: default_minor_window(),
            default_rolling_window: default_rolling_window(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl DashConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        // BALANSIR_DASH_POLLING__INTERVAL_MS -> polling.interval_ms
        builder = builder.add_source(
            Environment::with_prefix("BALANSIR_DASH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut dash_config: DashConfig = config.try_deserialize()?;

        if let Ok(level) = std::env::var("BALANSIR_DASH_LOG_LEVEL") {
            dash_config.logging.level = level;
        }

        if let Ok(url) = std::env::var("BALANSIR_URL") {
            dash_config.server.base_url = url;
        }

        dash_config.validate()?;

        Ok(dash_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.base_url.is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "server.base_url".to_string(),
            ));
        }

        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "server.base_url".to_string(),
                message: "Must start with http:// or https://".to_string(),
            });
        }

        if self.polling.interval_ms == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "polling.interval_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.polling.max_in_flight == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "polling.max_in_flight".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.polling.bulk_load_max_attempts == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "polling.bulk_load_max_attempts".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.windows.minor_window_ms <= 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "windows.minor_window_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.windows.default_rolling_window.parse::<RollingWindow>().is_err() {
            return Err(ConfigLoadError::InvalidValue {
                key: "windows.default_rolling_window".to_string(),
                message: format!(
                    "Unknown window '{}'. Must be one of: 1m, 5m, 30m, 3h, 24h",
                    self.windows.default_rolling_window
                ),
            });
        }

        // FixedOffset accepts strictly less than a day in either direction
        if self
            .calendar
            .utc_offset_minutes
            .is_some_and(|minutes| minutes.abs() >= 24 * 60)
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "calendar.utc_offset_minutes".to_string(),
                message: "Must be within -1439..=1439".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    pub fn base_url(&self) -> &str {
        self.server.base_url.trim_end_matches('/')
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.server.connect_timeout_ms)
    }

    /// Falls back to `1m` for configurations that skipped `validate()`.
    pub fn rolling_window(&self) -> RollingWindow {
        self.windows
            .default_rolling_window
            .parse()
            .unwrap_or_default()
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.calendar
            .utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
            .unwrap_or_else(|| Utc.fix())
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("balansir-dash.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let env_paths = get_dotenv_paths();

    for path in env_paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

fn get_dotenv_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join(".env"));
    }

    paths
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("balansir-dash"))
}
