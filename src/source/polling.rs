//! Polling Source
//!
//! Location providers answer "where am I now?" rather than pushing events.
//! `PollingSource` asks the provider once per sampling interval and forwards
//! each fix as a sample, so the rest of the pipeline sees an ordinary push
//! stream with a stop handle.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{sampling_period, SensorSource, SourceError, SourceStream, StopHandle, SAMPLE_BUFFER};
use crate::sensors::{Sample, SensorCategory, SensorDescriptor};

/// How long a single position request may take
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(15);

/// A location fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Outcome of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// One-shot location lookups
#[async_trait]
pub trait PositionProvider: Send + Sync + 'static {
    /// Ask the platform for location access
    async fn request_permission(&self) -> Permission;

    /// Current position fix
    async fn current_position(&self) -> Result<Position, SourceError>;
}

/// Repeating position poll exposed as a push stream
pub struct PollingSource<P> {
    provider: Arc<P>,
    poll_timeout: Duration,
}

impl<P: PositionProvider> PollingSource<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Builder method: set per-request timeout
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

#[async_trait]
impl<P: PositionProvider> SensorSource for PollingSource<P> {
    async fn open(&self, descriptor: &SensorDescriptor) -> Result<SourceStream, SourceError> {
        if descriptor.category != SensorCategory::Gps {
            return Err(SourceError::Unavailable(format!(
                "{} is not a location sensor",
                descriptor.id
            )));
        }
        let period = sampling_period(descriptor)?;

        if self.provider.request_permission().await == Permission::Denied {
            tracing::warn!(sensor = %descriptor.id, "Location permission denied");
            return Err(SourceError::PermissionDenied);
        }

        let (tx, rx) = mpsc::channel(SAMPLE_BUFFER);
        let provider = Arc::clone(&self.provider);
        let poll_timeout = self.poll_timeout;
        let sensor_id = descriptor.id.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);

            loop {
                ticker.tick().await;

                let fix = tokio::time::timeout(poll_timeout, provider.current_position()).await;
                let position = match fix {
                    Ok(Ok(position)) => position,
                    Ok(Err(e)) => {
                        tracing::warn!(sensor = %sensor_id, error = %e, "Position poll failed");
                        continue;
                    }
                    Err(_) => {
                        tracing::warn!(sensor = %sensor_id, "Position poll timed out");
                        continue;
                    }
                };

                let sample = Sample::Position {
                    latitude: position.latitude,
                    longitude: position.longitude,
                };
                if tx.send(sample).await.is_err() {
                    break;
                }
            }
        });

        Ok(SourceStream::new(rx, StopHandle::from_task(task)))
    }
}

/// Location provider that drifts around a fixed point
#[derive(Debug)]
pub struct SimulatedPosition {
    origin: Position,
    permission: Permission,
    polls: AtomicU64,
}

impl SimulatedPosition {
    pub fn new(origin: Position) -> Self {
        Self {
            origin,
            permission: Permission::Granted,
            polls: AtomicU64::new(0),
        }
    }

    /// Builder method: answer permission requests with `permission`
    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }
}

impl Default for SimulatedPosition {
    fn default() -> Self {
        Self::new(Position {
            latitude: 37.5665,
            longitude: 126.978,
        })
    }
}

#[async_trait]
impl PositionProvider for SimulatedPosition {
    async fn request_permission(&self) -> Permission {
        self.permission
    }

    async fn current_position(&self) -> Result<Position, SourceError> {
        let n = self.polls.fetch_add(1, Ordering::Relaxed) as f64 / 10.0;
        Ok(Position {
            latitude: self.origin.latitude + 0.0001 * n.sin(),
            longitude: self.origin.longitude + 0.0001 * n.cos(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Fails every other poll
    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PositionProvider for Flaky {
        async fn request_permission(&self) -> Permission {
            Permission::Granted
        }

        async fn current_position(&self) -> Result<Position, SourceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Err(SourceError::Unavailable("no fix".to_string()))
            } else {
                Ok(Position {
                    latitude: 1.0,
                    longitude: 2.0,
                })
            }
        }
    }

    fn gps() -> SensorDescriptor {
        SensorDescriptor::new("gps", SensorCategory::Gps).sampling_interval_ms(5)
    }

    #[tokio::test]
    async fn test_poll_becomes_stream() {
        let source = PollingSource::new(SimulatedPosition::default());

        let (mut rx, stop) = source.open(&gps()).await.unwrap().into_parts();
        let sample = rx.recv().await.unwrap();
        assert!(sample.fits(SensorCategory::Gps));

        stop.stop();
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let provider = SimulatedPosition::default().permission(Permission::Denied);
        let source = PollingSource::new(provider);

        let err = source.open(&gps()).await.err().unwrap();
        assert_eq!(err, SourceError::PermissionDenied);
    }

    #[tokio::test]
    async fn test_failed_polls_are_skipped() {
        let source = PollingSource::new(Flaky {
            calls: AtomicUsize::new(0),
        });

        let (mut rx, stop) = source.open(&gps()).await.unwrap().into_parts();
        assert_eq!(
            rx.recv().await,
            Some(Sample::Position {
                latitude: 1.0,
                longitude: 2.0
            })
        );

        stop.stop();
    }

    #[tokio::test]
    async fn test_zero_interval_is_unavailable() {
        let source = PollingSource::new(SimulatedPosition::default());
        let descriptor = gps().sampling_interval_ms(0);

        assert!(matches!(
            source.open(&descriptor).await,
            Err(SourceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_location_sensor() {
        let source = PollingSource::new(SimulatedPosition::default());
        let descriptor = SensorDescriptor::new("barometer", SensorCategory::Barometer);

        assert!(matches!(
            source.open(&descriptor).await,
            Err(SourceError::Unavailable(_))
        ));
    }
}
