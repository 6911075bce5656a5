//! Error types for the dashboard state layer.
//!
//! Every failure the dashboard can observe is funnelled into [`DashError`].
//! None of them is allowed to stop the polling timer: callers decide per
//! category whether to skip, retry or surface.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Network | Request, status and timeout errors |
//! | E2001-E2099 | Config | Config file, environment and validation errors |
//! | E3001-E3099 | Payload | Invalid, torn or empty response bodies |
//! | E4001-E4099 | Input | Rejected user input (time of day, dates, presets, tags) |
//! | E9001-E9099 | General | Internal, IO and serialization errors |

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Configuration for bounded retries with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry policy for the collected-stats bulk load.
    ///
    /// The server rewrites its stats file in place, so a read can race the
    /// writer; a short pause is usually enough for the next read to succeed.
    pub fn for_bulk_load(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // up to 25% extra
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Cheap jitter source based on the current timestamp, in `0.0..1.0`.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// The main error type of the dashboard state layer.
#[derive(Debug, Clone, Error)]
pub enum DashError {
    // ========================================================================
    // Network Errors (E1001-E1099)
    // ========================================================================
    /// The HTTP request could not be sent or the connection dropped
    #[error("[E1001] Request to {endpoint} failed: {message}")]
    RequestFailed { endpoint: String, message: String },

    /// The server answered with a non-success status
    #[error("[E1002] {endpoint} answered with status {status}")]
    BadStatus { endpoint: String, status: u16 },

    /// The request did not complete in time
    #[error("[E1003] Request to {0} timed out")]
    Timeout(String),

    // ========================================================================
    // Configuration Errors (E2001-E2099)
    // ========================================================================
    /// Configuration file parse error
    #[error("[E2001] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// Invalid configuration value
    #[error("[E2002] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    // ========================================================================
    // Payload Errors (E3001-E3099)
    // ========================================================================
    /// The body is not valid JSON for the expected shape
    #[error("[E3001] Invalid payload from {endpoint}: {message}")]
    InvalidPayload { endpoint: String, message: String },

    /// The body ends mid-record, typically a read racing the server's writer
    #[error("[E3002] Truncated payload from {endpoint} after {parsed} records: {message}")]
    TornPayload {
        endpoint: String,
        parsed: usize,
        message: String,
    },

    /// The body contained no records at all
    #[error("[E3003] Empty payload from {0}")]
    EmptyPayload(String),

    // ========================================================================
    // Input Errors (E4001-E4099)
    // ========================================================================
    /// Time of day is not "HH:MM" within 00:00..=23:59
    #[error("[E4001] Invalid time of day '{0}', expected HH:MM")]
    InvalidTimeOfDay(String),

    /// The year/month/day triple does not name a calendar day
    #[error("[E4002] Invalid calendar date {year}-{month}-{day}")]
    InvalidDate { year: i32, month: u32, day: u32 },

    /// Unknown rolling window label
    #[error("[E4003] Unknown rolling window '{0}', expected one of 1m, 5m, 30m, 3h, 24h")]
    UnknownRollingWindow(String),

    /// Unknown log tag
    #[error("[E4004] Unknown log tag '{0}'")]
    UnknownLogTag(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    #[error("[E9002] IO error: {0}")]
    IoError(String),

    #[error("[E9003] Serialization error: {0}")]
    SerializationError(String),
}

pub type DashResult<T> = Result<T, DashError>;

impl DashError {
    pub fn request_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        DashError::RequestFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn invalid_payload(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        DashError::InvalidPayload {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            DashError::RequestFailed { .. } | DashError::BadStatus { .. } | DashError::Timeout(_)
        )
    }

    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            DashError::InvalidPayload { .. }
                | DashError::TornPayload { .. }
                | DashError::EmptyPayload(_)
        )
    }

    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DashError::InvalidTimeOfDay(_)
                | DashError::InvalidDate { .. }
                | DashError::UnknownRollingWindow(_)
                | DashError::UnknownLogTag(_)
        )
    }

    /// Whether trying the same request again may succeed.
    ///
    /// Torn and invalid payloads count as transient because the collected
    /// stats file is rewritten in place while being served.
    pub fn is_transient(&self) -> bool {
        match self {
            DashError::RequestFailed { .. }
            | DashError::Timeout(_)
            | DashError::InvalidPayload { .. }
            | DashError::TornPayload { .. } => true,
            DashError::BadStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            DashError::RequestFailed { .. } => "E1001",
            DashError::BadStatus { .. } => "E1002",
            DashError::Timeout(_) => "E1003",
            DashError::ConfigParseError(_) => "E2001",
            DashError::InvalidConfigValue { .. } => "E2002",
            DashError::InvalidPayload { .. } => "E3001",
            DashError::TornPayload { .. } => "E3002",
            DashError::EmptyPayload(_) => "E3003",
            DashError::InvalidTimeOfDay(_) => "E4001",
            DashError::InvalidDate { .. } => "E4002",
            DashError::UnknownRollingWindow(_) => "E4003",
            DashError::UnknownLogTag(_) => "E4004",
            DashError::Internal(_) => "E9001",
            DashError::IoError(_) => "E9002",
            DashError::SerializationError(_) => "E9003",
        }
    }

    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            DashError::RequestFailed { .. } | DashError::Timeout(_) => {
                Some("Check that Balansir is running and server.base_url points at it")
            }
            DashError::BadStatus { .. } => {
                Some("Check that the dashboard endpoints are enabled on the Balansir instance")
            }
            DashError::ConfigParseError(_) | DashError::InvalidConfigValue { .. } => {
                Some("Check balansir-dash.toml and BALANSIR_DASH_* environment variables")
            }
            DashError::InvalidTimeOfDay(_) => Some("Use a 24-hour time such as 09:30"),
            DashError::UnknownRollingWindow(_) => Some("Use one of 1m, 5m, 30m, 3h, 24h"),
            DashError::UnknownLogTag(_) => Some("Use one of INFO, NOTICE, WARNING, ERROR, FATAL"),
            _ => None,
        }
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_transient() {
            warn!(
                error_code = %code,
                suggestion = suggestion,
                "Transient error occurred: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }
}

impl From<reqwest::Error> for DashError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());

        if err.is_timeout() {
            DashError::Timeout(endpoint)
        } else if let Some(status) = err.status() {
            DashError::BadStatus {
                endpoint,
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            DashError::InvalidPayload {
                endpoint,
                message: err.to_string(),
            }
        } else {
            DashError::RequestFailed {
                endpoint,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for DashError {
    fn from(err: serde_json::Error) -> Self {
        DashError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DashError {
    fn from(err: std::io::Error) -> Self {
        DashError::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for DashError {
    fn from(err: config::ConfigError) -> Self {
        DashError::ConfigParseError(err.to_string())
    }
}

// ============================================================================
// Retry utilities
// ============================================================================

/// Execute an async operation, retrying transient failures.
///
/// Non-transient errors and the final failure are returned unlogged; the
/// caller decides how loudly to report them.
pub async fn retry_async_with_config<F, Fut, T>(operation: F, config: RetryConfig) -> DashResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = DashResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() || attempt + 1 >= config.max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                debug!(
                    error_code = e.error_code(),
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| DashError::Internal("Retry loop ran zero attempts".to_string())))
}
