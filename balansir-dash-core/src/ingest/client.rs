use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;

use super::parse::{parse_record, parse_records};
use crate::config::DashConfig;
use crate::error::{DashError, DashResult};
use crate::models::{LogRecord, Sample};

pub const STATS_PATH: &str = "/metrics/stats";
pub const COLLECTED_STATS_PATH: &str = "/metrics/collected_stats";
pub const COLLECTED_LOGS_PATH: &str = "/logs/collected_logs";

/// The three read endpoints the dashboard consumes.
///
/// Futures are `?Send`: the dashboard graph and everything feeding it live
/// on one `LocalSet`.
#[async_trait(?Send)]
pub trait MetricsApi {
    /// The latest sample.
    async fn fetch_stats(&self) -> DashResult<Sample>;

    /// Every sample the server has persisted so far.
    async fn fetch_collected_stats(&self) -> DashResult<Vec<Sample>>;

    async fn fetch_collected_logs(&self) -> DashResult<Vec<LogRecord>>;
}

#[derive(Debug, Clone)]
pub struct BalansirClient {
    client: reqwest::Client,
    base_url: String,
}

impl BalansirClient {
    pub fn new(base_url: impl Into<String>) -> DashResult<Self> {
        Self::with_timeouts(base_url, Duration::from_secs(2), Duration::from_millis(500))
    }

    pub fn from_config(config: &DashConfig) -> DashResult<Self> {
        Self::with_timeouts(
            config.base_url(),
            config.request_timeout(),
            config.connect_timeout(),
        )
    }

    pub fn with_timeouts(
        base_url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> DashResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DashError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Raw body of `GET {base}{path}`; non-2xx answers are errors.
    async fn get_bytes(&self, path: &str) -> DashResult<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| with_endpoint(e, path))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DashError::BadStatus {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| with_endpoint(e, path))?;
        trace!(endpoint = path, bytes = body.len(), "response received");
        Ok(body.to_vec())
    }
}

/// Converts a transport error, naming the endpoint rather than the full URL.
fn with_endpoint(err: reqwest::Error, path: &str) -> DashError {
    match DashError::from(err) {
        DashError::Timeout(_) => DashError::Timeout(path.to_string()),
        DashError::BadStatus { status, .. } => DashError::BadStatus {
            endpoint: path.to_string(),
            status,
        },
        DashError::InvalidPayload { message, .. } => DashError::invalid_payload(path, message),
        DashError::RequestFailed { message, .. } => DashError::request_failed(path, message),
        other => other,
    }
}

#[async_trait(?Send)]
impl MetricsApi for BalansirClient {
    async fn fetch_stats(&self) -> DashResult<Sample> {
        let body = self.get_bytes(STATS_PATH).await?;
        parse_record(STATS_PATH, &body)
    }

    async fn fetch_collected_stats(&self) -> DashResult<Vec<Sample>> {
        let body = self.get_bytes(COLLECTED_STATS_PATH).await?;
        parse_records(COLLECTED_STATS_PATH, &body)
    }

    async fn fetch_collected_logs(&self) -> DashResult<Vec<LogRecord>> {
        let body = self.get_bytes(COLLECTED_LOGS_PATH).await?;
        parse_records(COLLECTED_LOGS_PATH, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = BalansirClient::new("http://localhost:8080/balansir/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/balansir");
    }

    #[test]
    fn test_from_config() {
        let mut config = DashConfig::default();
        config.server.base_url = "http://10.0.0.5:9000/balansir".to_string();
        let client = BalansirClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "http://10.0.0.5:9000/balansir");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let client = BalansirClient::with_timeouts(
            "http://127.0.0.1:1",
            Duration::from_millis(200),
            Duration::from_millis(100),
        )
        .unwrap();
        let err = client.fetch_stats().await.unwrap_err();
        assert!(err.is_network_error(), "unexpected error {err:?}");
        assert!(err.is_transient());
    }
}
