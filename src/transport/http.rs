//! HTTP Transport
//!
//! POSTs readings to the collector as JSON. No retries: a failed attempt is
//! reported and the next tick sends whatever is current by then.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use super::{DispatchResult, SensorPayload, Transport};
use crate::sensors::Reading;

/// Longest collector response body quoted in an error reason
const MAX_BODY_IN_REASON: usize = 200;

/// Configuration for the HTTP transport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Full collector URL (e.g., "http://127.0.0.1:8080/api/sensor/data")
    pub endpoint: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/api/sensor/data".to_string(),
            request_timeout_ms: 5000,
        }
    }
}

/// reqwest-backed collector client
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// POST one payload, mapping every failure to a `TransportError`
    async fn post(&self, sensor_id: &str, reading: &Reading) -> Result<(), TransportError> {
        let body = SensorPayload::borrowed(sensor_id, reading);

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Unreachable(self.config.endpoint.clone())
                } else {
                    TransportError::Request(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut text = response.text().await.unwrap_or_default();
        if text.len() > MAX_BODY_IN_REASON {
            let mut cut = MAX_BODY_IN_REASON;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }

        Err(TransportError::Status {
            status: status.as_u16(),
            body: text,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, sensor_id: &str, reading: &Reading) -> DispatchResult {
        match self.post(sensor_id, reading).await {
            Ok(()) => {
                tracing::debug!(sensor = %sensor_id, "Reading delivered");
                DispatchResult::Success
            }
            Err(e) => {
                tracing::warn!(sensor = %sensor_id, error = %e, "Reading delivery failed");
                DispatchResult::Error(e.to_string())
            }
        }
    }
}

/// Errors that can occur when talking to the collector
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("collector unreachable at {0}")]
    Unreachable(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collector returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}
