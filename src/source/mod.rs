//! Sensor Sources
//!
//! Every production mechanism (push streams from motion hardware, a repeating
//! location poll, samples bridged in from a native layer) is exposed through
//! the same "cancellable producer" shape: [`SensorSource::open`] returns a
//! [`SourceStream`], which is a channel of raw [`Sample`]s plus a
//! [`StopHandle`] that shuts the producer down.
//!
//! ## Implementations
//!
//! - [`ChannelSource`]: samples pushed in from outside (native bridges, tests)
//! - [`SimulatedSource`]: synthetic push streams for every category
//! - [`PollingSource`]: wraps a [`PositionProvider`] poll into a push stream

mod channel;
mod polling;
mod simulated;

pub use channel::ChannelSource;
pub use polling::{Permission, PollingSource, Position, PositionProvider, SimulatedPosition};
pub use simulated::SimulatedSource;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sensors::{Sample, SensorDescriptor};

/// Buffer between a producer and the store writer
pub const SAMPLE_BUFFER: usize = 64;

/// A producer of raw samples for one sensor
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Start producing samples at the descriptor's sampling interval
    async fn open(&self, descriptor: &SensorDescriptor) -> Result<SourceStream, SourceError>;
}

/// An open producer: its samples and the means to stop it
pub struct SourceStream {
    samples: mpsc::Receiver<Sample>,
    stop: StopHandle,
}

impl SourceStream {
    pub fn new(samples: mpsc::Receiver<Sample>, stop: StopHandle) -> Self {
        Self { samples, stop }
    }

    pub fn into_parts(self) -> (mpsc::Receiver<Sample>, StopHandle) {
        (self.samples, self.stop)
    }
}

/// Stops a producer, either explicitly or when dropped
///
/// Stopping may complete asynchronously; callers must not rely on the
/// producer having gone quiet when `stop` returns.
pub struct StopHandle {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl StopHandle {
    pub fn from_fn(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Abort a spawned producer task
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self::from_fn(move || task.abort())
    }

    pub fn noop() -> Self {
        Self { stop: None }
    }

    pub fn stop(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("armed", &self.stop.is_some())
            .finish()
    }
}

/// Sampling period for a timed producer
///
/// A zero interval cannot drive a timer, so the open is refused instead.
pub(crate) fn sampling_period(descriptor: &SensorDescriptor) -> Result<Duration, SourceError> {
    if descriptor.sampling_interval_ms == 0 {
        return Err(SourceError::Unavailable(format!(
            "{} has a zero sampling interval",
            descriptor.id
        )));
    }
    Ok(descriptor.sampling_interval())
}

/// Errors a source reports when it cannot be opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied")]
    PermissionDenied,
}

/// Which source serves which sensor
#[derive(Clone, Default)]
pub struct SourceSet {
    fallback: Option<Arc<dyn SensorSource>>,
    by_sensor: HashMap<String, Arc<dyn SensorSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every sensor without a dedicated source from `source`
    pub fn fallback(mut self, source: Arc<dyn SensorSource>) -> Self {
        self.fallback = Some(source);
        self
    }

    /// Serve `sensor_id` from `source`
    pub fn route(mut self, sensor_id: impl Into<String>, source: Arc<dyn SensorSource>) -> Self {
        self.by_sensor.insert(sensor_id.into(), source);
        self
    }

    pub fn for_sensor(&self, sensor_id: &str) -> Option<Arc<dyn SensorSource>> {
        self.by_sensor
            .get(sensor_id)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_stop_handle_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = StopHandle::from_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        handle.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_handle_runs_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        {
            let _handle = StopHandle::from_fn(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_sampling_interval_is_refused() {
        use crate::sensors::SensorCategory;

        let descriptor =
            SensorDescriptor::new("barometer", SensorCategory::Barometer).sampling_interval_ms(0);
        assert_eq!(
            sampling_period(&descriptor),
            Err(SourceError::Unavailable(
                "barometer has a zero sampling interval".to_string()
            ))
        );

        let descriptor = descriptor.sampling_interval_ms(250);
        assert_eq!(sampling_period(&descriptor), Ok(Duration::from_millis(250)));
    }

    #[test]
    fn test_source_set_routing() {
        let channel: Arc<dyn SensorSource> = Arc::new(ChannelSource::new());
        let simulated: Arc<dyn SensorSource> = Arc::new(SimulatedSource::new());

        let set = SourceSet::new()
            .fallback(Arc::clone(&simulated))
            .route("gps", Arc::clone(&channel));

        assert!(Arc::ptr_eq(&set.for_sensor("gps").unwrap(), &channel));
        assert!(Arc::ptr_eq(&set.for_sensor("barometer").unwrap(), &simulated));
        assert!(SourceSet::new().for_sensor("gps").is_none());
    }
}
