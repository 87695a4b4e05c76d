//! Channel Source
//!
//! A source whose samples are pushed in from outside the crate: a native
//! sensor bridge forwarding hardware events, or a test driving emissions by
//! hand. The source can also be told to refuse opens, mirroring missing
//! hardware or a denied permission prompt.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::{SensorSource, SourceError, SourceStream, StopHandle, SAMPLE_BUFFER};
use crate::sensors::{Sample, SensorDescriptor};

#[derive(Default)]
struct ChannelState {
    open: HashMap<String, (u64, mpsc::Sender<Sample>)>,
    unavailable: HashMap<String, String>,
    denied: HashSet<String>,
    opened: u64,
}

/// Externally driven sample source
#[derive(Clone, Default)]
pub struct ChannelSource {
    state: Arc<Mutex<ChannelState>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push a sample to the sensor's open stream
    ///
    /// Returns false if the sensor has no open stream or its buffer is full.
    pub fn emit(&self, sensor_id: &str, sample: Sample) -> bool {
        match self.sender(sensor_id) {
            Some(tx) => tx.try_send(sample).is_ok(),
            None => false,
        }
    }

    /// Clone of the open stream's sender
    ///
    /// Holding on to it past a cancellation reproduces an emission that was
    /// already in flight when the sensor was turned off.
    pub fn sender(&self, sensor_id: &str) -> Option<mpsc::Sender<Sample>> {
        self.state().open.get(sensor_id).map(|(_, tx)| tx.clone())
    }

    pub fn is_open(&self, sensor_id: &str) -> bool {
        self.state().open.contains_key(sensor_id)
    }

    /// Refuse future opens as if the hardware were missing
    pub fn mark_unavailable(&self, sensor_id: &str, reason: impl Into<String>) {
        self.state()
            .unavailable
            .insert(sensor_id.to_string(), reason.into());
    }

    /// Refuse future opens as if the user declined the permission prompt
    pub fn deny_permission(&self, sensor_id: &str) {
        self.state().denied.insert(sensor_id.to_string());
    }

    /// Undo `mark_unavailable` and `deny_permission`
    pub fn restore(&self, sensor_id: &str) {
        let mut state = self.state();
        state.unavailable.remove(sensor_id);
        state.denied.remove(sensor_id);
    }
}

#[async_trait]
impl SensorSource for ChannelSource {
    async fn open(&self, descriptor: &SensorDescriptor) -> Result<SourceStream, SourceError> {
        let mut state = self.state();

        if state.denied.contains(&descriptor.id) {
            return Err(SourceError::PermissionDenied);
        }
        if let Some(reason) = state.unavailable.get(&descriptor.id) {
            return Err(SourceError::Unavailable(reason.clone()));
        }

        let (tx, rx) = mpsc::channel(SAMPLE_BUFFER);
        state.opened += 1;
        let token = state.opened;
        state.open.insert(descriptor.id.clone(), (token, tx));
        drop(state);

        let shared = Arc::clone(&self.state);
        let sensor_id = descriptor.id.clone();
        let stop = StopHandle::from_fn(move || {
            let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
            if state.open.get(&sensor_id).map(|(t, _)| *t) == Some(token) {
                state.open.remove(&sensor_id);
            }
        });

        Ok(SourceStream::new(rx, stop))
    }
}
