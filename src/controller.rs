//! Subscription Controller
//!
//! Per-sensor two-state machine (`Idle <-> Active`) driven by `toggle`.
//!
//! Turning a sensor on opens its source, issues a fresh store generation and
//! spawns a forwarder that stamps each sample and writes it under that
//! generation. Turning it off closes the generation before returning, so no
//! emission still in flight can land afterwards, then stops the source. The
//! last reading stays in the store untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::sensors::{
    Reading, Sample, SensorCategory, SensorDescriptor, SensorError, SensorRegistry, SensorResult,
};
use crate::source::{SourceError, SourceSet, StopHandle};
use crate::store::{Generation, ReadingStore};

/// Snapshot of which sensors are on
pub type EnablementState = HashMap<String, bool>;

/// Lifecycle state of one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Idle,
    Active,
}

/// Capability to end one subscription lifetime
///
/// Dropping a handle cancels it as well.
pub struct SubscriptionHandle {
    sensor_id: String,
    generation: Generation,
    source: Option<StopHandle>,
    forwarder: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Stop the source and the forwarder
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(source) = self.source.take() {
            source.stop();
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

struct ControlSlot {
    descriptor: SensorDescriptor,
    enabled: AtomicBool,
    handle: Mutex<Option<SubscriptionHandle>>,
}

/// Owns enablement and the live subscription of every sensor
pub struct SubscriptionController {
    slots: HashMap<String, ControlSlot>,
    order: Vec<String>,
    store: Arc<ReadingStore>,
    sources: SourceSet,
    clock: Arc<dyn Clock>,
}

impl SubscriptionController {
    pub fn new(
        registry: &SensorRegistry,
        store: Arc<ReadingStore>,
        sources: SourceSet,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let slots = registry
            .descriptors()
            .iter()
            .map(|d| {
                let slot = ControlSlot {
                    descriptor: d.clone(),
                    enabled: AtomicBool::new(false),
                    handle: Mutex::new(None),
                };
                (d.id.clone(), slot)
            })
            .collect();

        Self {
            slots,
            order: registry.ids().map(String::from).collect(),
            store,
            sources,
            clock,
        }
    }

    fn slot(&self, sensor_id: &str) -> SensorResult<&ControlSlot> {
        self.slots
            .get(sensor_id)
            .ok_or_else(|| SensorError::UnknownSensor(sensor_id.to_string()))
    }

    /// Flip a sensor between Idle and Active, returning the new state
    ///
    /// If the source cannot be opened the sensor stays Idle and the failure
    /// is returned as `SensorUnavailable` or `PermissionDenied`.
    pub async fn toggle(&self, sensor_id: &str) -> SensorResult<SensorState> {
        let slot = self.slot(sensor_id)?;
        let mut current = slot.handle.lock().await;

        match current.take() {
            Some(handle) => {
                self.deactivate(slot, handle).await;
                Ok(SensorState::Idle)
            }
            None => {
                *current = Some(self.activate(slot).await?);
                Ok(SensorState::Active)
            }
        }
    }

    /// Drive a sensor to the requested state; a no-op if already there
    pub async fn set_enabled(&self, sensor_id: &str, enabled: bool) -> SensorResult<SensorState> {
        let slot = self.slot(sensor_id)?;
        let mut current = slot.handle.lock().await;

        match (current.take(), enabled) {
            (Some(handle), false) => {
                self.deactivate(slot, handle).await;
                Ok(SensorState::Idle)
            }
            (Some(handle), true) => {
                *current = Some(handle);
                Ok(SensorState::Active)
            }
            (None, true) => {
                *current = Some(self.activate(slot).await?);
                Ok(SensorState::Active)
            }
            (None, false) => Ok(SensorState::Idle),
        }
    }

    async fn activate(&self, slot: &ControlSlot) -> SensorResult<SubscriptionHandle> {
        let descriptor = &slot.descriptor;
        let sensor_id = descriptor.id.as_str();

        let source = self.sources.for_sensor(sensor_id).ok_or_else(|| {
            SensorError::SensorUnavailable {
                sensor: sensor_id.to_string(),
                reason: "no source registered".to_string(),
            }
        })?;

        let stream = source.open(descriptor).await.map_err(|e| {
            tracing::warn!(sensor = %sensor_id, error = %e, "Failed to open sensor source");
            match e {
                SourceError::PermissionDenied => SensorError::PermissionDenied {
                    sensor: sensor_id.to_string(),
                },
                SourceError::Unavailable(reason) => SensorError::SensorUnavailable {
                    sensor: sensor_id.to_string(),
                    reason,
                },
            }
        })?;
        let (samples, stop) = stream.into_parts();

        let generation = self.store.open_generation(sensor_id).await?;
        slot.enabled.store(true, Ordering::SeqCst);

        let forwarder = tokio::spawn(forward(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            sensor_id.to_string(),
            descriptor.category,
            generation,
            samples,
        ));

        tracing::info!(
            sensor = %sensor_id,
            generation = %generation,
            interval_ms = descriptor.sampling_interval_ms,
            "Sensor activated"
        );

        Ok(SubscriptionHandle {
            sensor_id: sensor_id.to_string(),
            generation,
            source: Some(stop),
            forwarder: Some(forwarder),
        })
    }

    async fn deactivate(&self, slot: &ControlSlot, handle: SubscriptionHandle) {
        let sensor_id = handle.sensor_id().to_string();
        let generation = handle.generation();

        // Close the generation first so nothing written from here on sticks
        if let Err(e) = self.store.close_generation(&sensor_id, generation).await {
            tracing::error!(sensor = %sensor_id, error = %e, "Failed to close generation");
        }
        slot.enabled.store(false, Ordering::SeqCst);
        handle.cancel();

        tracing::info!(sensor = %sensor_id, generation = %generation, "Sensor deactivated");
    }

    pub fn is_enabled(&self, sensor_id: &str) -> SensorResult<bool> {
        Ok(self.slot(sensor_id)?.enabled.load(Ordering::SeqCst))
    }

    pub fn state_of(&self, sensor_id: &str) -> SensorResult<SensorState> {
        Ok(if self.is_enabled(sensor_id)? {
            SensorState::Active
        } else {
            SensorState::Idle
        })
    }

    pub fn current_state(&self) -> EnablementState {
        self.slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.enabled.load(Ordering::SeqCst)))
            .collect()
    }

    /// Enabled sensor ids in registry order
    pub fn enabled_sensors(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.slots
                    .get(id.as_str())
                    .map(|s| s.enabled.load(Ordering::SeqCst))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Cancel every live subscription
    ///
    /// Safe to call repeatedly and on sensors that were never activated.
    pub async fn shutdown(&self) {
        for id in &self.order {
            if let Some(slot) = self.slots.get(id) {
                let handle = slot.handle.lock().await.take();
                if let Some(handle) = handle {
                    self.deactivate(slot, handle).await;
                }
            }
        }
    }
}

/// Stamp and store every sample of one subscription lifetime
async fn forward(
    store: Arc<ReadingStore>,
    clock: Arc<dyn Clock>,
    sensor_id: String,
    category: SensorCategory,
    generation: Generation,
    mut samples: mpsc::Receiver<Sample>,
) {
    while let Some(sample) = samples.recv().await {
        if !sample.fits(category) {
            tracing::debug!(
                sensor = %sensor_id,
                sample = ?sample,
                "Dropping sample with wrong shape for {}",
                category
            );
            continue;
        }

        let reading = Reading::stamped(sample, clock.now());
        match store.set(&sensor_id, reading, generation).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::error!(sensor = %sensor_id, error = %e, "Store rejected reading");
                break;
            }
        }
    }

    tracing::trace!(sensor = %sensor_id, generation = %generation, "Forwarder finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::source::ChannelSource;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct Harness {
        controller: SubscriptionController,
        store: Arc<ReadingStore>,
        source: ChannelSource,
        clock: Arc<FixedClock>,
    }

    fn harness() -> Harness {
        let registry = SensorRegistry::standard();
        let store = Arc::new(ReadingStore::new(&registry));
        let source = ChannelSource::new();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let controller = SubscriptionController::new(
            &registry,
            Arc::clone(&store),
            SourceSet::new().fallback(Arc::new(source.clone())),
            clock.clone(),
        );

        Harness {
            controller,
            store,
            source,
            clock,
        }
    }

    /// Wait until the store reflects a sample pushed through the forwarder
    async fn settle<F: Fn(&Reading) -> bool>(store: &ReadingStore, id: &str, done: F) -> Reading {
        for _ in 0..200 {
            let reading = store.get(id).await.unwrap();
            if done(&reading) {
                return reading;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("store never settled for {id}");
    }

    #[tokio::test]
    async fn test_toggle_unknown_sensor() {
        let h = harness();
        assert_eq!(
            h.controller.toggle("unknown-sensor").await,
            Err(SensorError::UnknownSensor("unknown-sensor".to_string()))
        );
    }

    #[tokio::test]
    async fn test_toggle_round_trip_without_emission() {
        let h = harness();
        let before = h.store.get("gyroscope").await.unwrap();

        assert_eq!(h.controller.toggle("gyroscope").await, Ok(SensorState::Active));
        assert!(h.controller.is_enabled("gyroscope").unwrap());

        assert_eq!(h.controller.toggle("gyroscope").await, Ok(SensorState::Idle));
        assert!(!h.controller.is_enabled("gyroscope").unwrap());
        assert_eq!(h.store.get("gyroscope").await.unwrap(), before);
        assert!(!h.source.is_open("gyroscope"));
    }

    #[tokio::test]
    async fn test_emission_is_stamped_and_stored() {
        let h = harness();
        h.controller.toggle("accelerometer").await.unwrap();

        assert!(h
            .source
            .emit("accelerometer", Sample::Motion { x: 1.0, y: 2.0, z: 3.0 }));
        let reading = settle(&h.store, "accelerometer", Reading::has_timestamp).await;

        let motion = reading.as_motion().unwrap();
        assert_eq!((motion.x, motion.y, motion.z), (1.0, 2.0, 3.0));
        assert_eq!(motion.timestamp, "2024-03-01T09:00:00.000Z");
    }

    #[tokio::test]
    async fn test_forwarder_write_after_generation_closed_is_discarded() {
        let h = harness();
        h.controller.toggle("magnetometer").await.unwrap();
        let generation = h
            .store
            .active_generation("magnetometer")
            .await
            .unwrap()
            .unwrap();

        h.source
            .emit("magnetometer", Sample::Motion { x: 1.0, y: 1.0, z: 1.0 });
        let frozen = settle(&h.store, "magnetometer", Reading::has_timestamp).await;

        // Cancellation has closed the generation but the forwarder is still live
        h.store
            .close_generation("magnetometer", generation)
            .await
            .unwrap();
        h.clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 5).unwrap());
        assert!(h
            .source
            .emit("magnetometer", Sample::Motion { x: 9.0, y: 9.0, z: 9.0 }));

        // The rejected write ends the forwarder, which drops its receiver
        let mut closed = false;
        for _ in 0..200 {
            if h.source.sender("magnetometer").unwrap().is_closed() {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(closed, "forwarder kept running after a stale write");
        assert_eq!(h.store.get("magnetometer").await.unwrap(), frozen);
    }

    #[tokio::test]
    async fn test_zero_sampling_interval_stays_idle() {
        let registry = SensorRegistry::new([SensorDescriptor::new(
            "barometer",
            SensorCategory::Barometer,
        )
        .sampling_interval_ms(0)]);
        let store = Arc::new(ReadingStore::new(&registry));
        let controller = SubscriptionController::new(
            &registry,
            Arc::clone(&store),
            SourceSet::new().fallback(Arc::new(crate::source::SimulatedSource::new())),
            Arc::new(crate::clock::SystemClock),
        );

        assert!(matches!(
            controller.toggle("barometer").await,
            Err(SensorError::SensorUnavailable { .. })
        ));
        assert_eq!(controller.current_state().get("barometer"), Some(&false));
        assert_eq!(store.active_generation("barometer").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reenable_issues_new_generation() {
        let h = harness();

        h.controller.toggle("barometer").await.unwrap();
        let first = h.store.active_generation("barometer").await.unwrap().unwrap();
        h.controller.toggle("barometer").await.unwrap();
        h.controller.toggle("barometer").await.unwrap();
        let second = h.store.active_generation("barometer").await.unwrap().unwrap();

        assert!(second > first);
        assert!(h.source.emit("barometer", Sample::Pressure { pressure: 1001.5 }));
        let reading = settle(&h.store, "barometer", Reading::has_timestamp).await;
        assert_eq!(reading.as_pressure().unwrap().pressure, 1001.5);
    }

    #[tokio::test]
    async fn test_unavailable_source_stays_idle() {
        let h = harness();
        h.source.mark_unavailable("barometer", "no pressure sensor");

        let err = h.controller.toggle("barometer").await.unwrap_err();
        assert_eq!(
            err,
            SensorError::SensorUnavailable {
                sensor: "barometer".to_string(),
                reason: "no pressure sensor".to_string(),
            }
        );
        assert_eq!(h.controller.state_of("barometer"), Ok(SensorState::Idle));
        assert_eq!(h.store.active_generation("barometer").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_permission_denied_stays_idle() {
        let h = harness();
        h.source.deny_permission("gps");

        assert_eq!(
            h.controller.toggle("gps").await,
            Err(SensorError::PermissionDenied {
                sensor: "gps".to_string()
            })
        );
        assert!(!h.controller.is_enabled("gps").unwrap());

        // A later attempt succeeds once the permission is granted
        h.source.restore("gps");
        assert_eq!(h.controller.toggle("gps").await, Ok(SensorState::Active));
    }

    #[tokio::test]
    async fn test_missing_source_is_unavailable() {
        let registry = SensorRegistry::standard();
        let store = Arc::new(ReadingStore::new(&registry));
        let controller = SubscriptionController::new(
            &registry,
            store,
            SourceSet::new(),
            Arc::new(crate::clock::SystemClock),
        );

        assert!(matches!(
            controller.toggle("gps").await,
            Err(SensorError::SensorUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_shape_sample_is_dropped() {
        let h = harness();
        h.controller.toggle("gps").await.unwrap();

        h.source.emit("gps", Sample::Pressure { pressure: 5.0 });
        h.source.emit(
            "gps",
            Sample::Position {
                latitude: 37.0,
                longitude: 127.0,
            },
        );

        let reading = settle(&h.store, "gps", Reading::has_timestamp).await;
        assert_eq!(reading.as_gps().unwrap().latitude, 37.0);
    }

    #[tokio::test]
    async fn test_set_enabled_is_idempotent() {
        let h = harness();

        assert_eq!(
            h.controller.set_enabled("gyroscope", true).await,
            Ok(SensorState::Active)
        );
        let generation = h.store.active_generation("gyroscope").await.unwrap();
        assert_eq!(
            h.controller.set_enabled("gyroscope", true).await,
            Ok(SensorState::Active)
        );
        assert_eq!(h.store.active_generation("gyroscope").await.unwrap(), generation);

        assert_eq!(
            h.controller.set_enabled("gyroscope", false).await,
            Ok(SensorState::Idle)
        );
        assert_eq!(
            h.controller.set_enabled("gyroscope", false).await,
            Ok(SensorState::Idle)
        );
    }

    #[tokio::test]
    async fn test_enabled_sensors_in_registry_order() {
        let h = harness();
        h.controller.toggle("barometer").await.unwrap();
        h.controller.toggle("accelerometer").await.unwrap();

        assert_eq!(
            h.controller.enabled_sensors(),
            vec!["accelerometer".to_string(), "barometer".to_string()]
        );

        let state = h.controller.current_state();
        assert_eq!(state.len(), 5);
        assert_eq!(state.get("barometer"), Some(&true));
        assert_eq!(state.get("gps"), Some(&false));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything_idempotently() {
        let h = harness();
        h.controller.toggle("accelerometer").await.unwrap();
        h.controller.toggle("gps").await.unwrap();

        h.controller.shutdown().await;
        h.controller.shutdown().await;

        assert!(h.controller.enabled_sensors().is_empty());
        assert!(!h.source.is_open("accelerometer"));
        assert!(!h.source.is_open("gps"));
    }
}
