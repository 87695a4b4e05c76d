//! Collector Transport
//!
//! Sends one reading to the remote collector and reports how it went.
//! Failures never escape as errors: every attempt yields a [`DispatchResult`].

mod http;

pub use http::{HttpTransport, TransportConfig, TransportError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::sensors::Reading;

/// Delivers readings to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one reading; any failure is folded into the result
    async fn send(&self, sensor_id: &str, reading: &Reading) -> DispatchResult;
}

/// Body posted to the collector: `{"type": "<sensor id>", "data": <reading>}`
///
/// The sender serializes borrowed fields; the collector deserializes owned
/// ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorPayload<'a> {
    #[serde(rename = "type")]
    pub sensor_type: Cow<'a, str>,
    pub data: Cow<'a, Reading>,
}

impl<'a> SensorPayload<'a> {
    pub fn borrowed(sensor_id: &'a str, reading: &'a Reading) -> Self {
        Self {
            sensor_type: Cow::Borrowed(sensor_id),
            data: Cow::Borrowed(reading),
        }
    }
}

/// Result of a single dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum DispatchResult {
    Success,
    Error(String),
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchResult::Success)
    }
}

/// Per-sensor outcome of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub sensor_id: String,
    pub result: DispatchResult,
    pub attempted_at: DateTime<Utc>,
}

impl DispatchOutcome {
    /// Title and message for a user-facing notification
    pub fn notification(&self) -> (&'static str, String) {
        match &self.result {
            DispatchResult::Success => ("Success", "Data sent successfully".to_string()),
            DispatchResult::Error(reason) => ("Error", format!("Error sending data: {}", reason)),
        }
    }
}
