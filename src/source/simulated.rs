//! Simulated Source
//!
//! Synthetic push streams for running the agent without hardware. Each open
//! spawns a task that emits a smooth waveform at the sampling interval.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::mpsc;

use super::{sampling_period, SensorSource, SourceError, SourceStream, StopHandle, SAMPLE_BUFFER};
use crate::sensors::{Sample, SensorCategory, SensorDescriptor};

/// Synthetic sample generator
#[derive(Debug, Clone, Default)]
pub struct SimulatedSource {
    missing: HashSet<String>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: report `sensor_id` as having no hardware
    pub fn missing(mut self, sensor_id: impl Into<String>) -> Self {
        self.missing.insert(sensor_id.into());
        self
    }
}

/// Deterministic sample for tick `n`
pub(crate) fn synthetic_sample(category: SensorCategory, n: u64) -> Sample {
    let t = n as f64 / 10.0;
    match category {
        SensorCategory::Accelerometer => Sample::Motion {
            x: 0.1 * t.sin(),
            y: 0.1 * t.cos(),
            z: 9.81 + 0.05 * (2.0 * t).sin(),
        },
        SensorCategory::Gyroscope => Sample::Motion {
            x: 0.02 * t.cos(),
            y: 0.02 * t.sin(),
            z: 0.01 * (3.0 * t).sin(),
        },
        SensorCategory::Magnetometer => Sample::Motion {
            x: 22.0 + t.sin(),
            y: -5.0 + t.cos(),
            z: -41.0 + 0.5 * t.sin(),
        },
        SensorCategory::Gps => Sample::Position {
            latitude: 37.5665 + 0.0001 * t.sin(),
            longitude: 126.978 + 0.0001 * t.cos(),
        },
        SensorCategory::Barometer => Sample::Pressure {
            pressure: 1013.25 + 0.3 * (t / 5.0).sin(),
        },
    }
}

#[async_trait]
impl SensorSource for SimulatedSource {
    async fn open(&self, descriptor: &SensorDescriptor) -> Result<SourceStream, SourceError> {
        if self.missing.contains(&descriptor.id) {
            return Err(SourceError::Unavailable(format!(
                "no {} hardware",
                descriptor.category
            )));
        }

        let period = sampling_period(descriptor)?;
        let (tx, rx) = mpsc::channel(SAMPLE_BUFFER);
        let category = descriptor.category;
        let sensor_id = descriptor.id.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut n = 0u64;

            loop {
                ticker.tick().await;
                if tx.send(synthetic_sample(category, n)).await.is_err() {
                    tracing::trace!(sensor = %sensor_id, "Simulated stream receiver gone");
                    break;
                }
                n += 1;
            }
        });

        Ok(SourceStream::new(rx, StopHandle::from_task(task)))
    }
}
