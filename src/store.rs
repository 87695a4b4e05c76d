//! Reading Store
//!
//! Keyed cache of the latest reading per sensor.
//!
//! Every slot carries the generation of the subscription currently allowed to
//! write into it. A write tagged with any other generation is discarded, which
//! is how emissions that race a cancellation are kept out of the cache.
//!
//! Slots are created once from the registry, so the map itself is never
//! mutated after construction and each sensor's slot is locked independently.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::sensors::{Reading, SensorError, SensorRegistry, SensorResult};

/// Capacity of the update feed
const UPDATE_CAPACITY: usize = 256;

/// Tag distinguishing successive subscription lifetimes of one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An accepted write, published on the update feed
#[derive(Debug, Clone)]
pub struct ReadingUpdate {
    pub sensor_id: String,
    pub generation: Generation,
    pub reading: Reading,
}

struct Slot {
    reading: Reading,
    active: Option<Generation>,
    issued: u64,
}

/// Latest-reading cache with a per-sensor generation guard
pub struct ReadingStore {
    slots: HashMap<String, RwLock<Slot>>,
    updates_tx: broadcast::Sender<ReadingUpdate>,
}

impl ReadingStore {
    /// Create a store with one zero-valued slot per registered sensor
    pub fn new(registry: &SensorRegistry) -> Self {
        let slots = registry
            .descriptors()
            .iter()
            .map(|d| {
                let slot = Slot {
                    reading: Reading::zero(d.category),
                    active: None,
                    issued: 0,
                };
                (d.id.clone(), RwLock::new(slot))
            })
            .collect();
        let (updates_tx, _) = broadcast::channel(UPDATE_CAPACITY);

        Self { slots, updates_tx }
    }

    fn slot(&self, sensor_id: &str) -> SensorResult<&RwLock<Slot>> {
        self.slots
            .get(sensor_id)
            .ok_or_else(|| SensorError::UnknownSensor(sensor_id.to_string()))
    }

    /// Latest reading, or the category's zero value if never set
    pub async fn get(&self, sensor_id: &str) -> SensorResult<Reading> {
        Ok(self.slot(sensor_id)?.read().await.reading.clone())
    }

    /// Apply a write if `generation` is the sensor's active generation
    ///
    /// Returns `Ok(false)` when the write was discarded as stale.
    pub async fn set(
        &self,
        sensor_id: &str,
        reading: Reading,
        generation: Generation,
    ) -> SensorResult<bool> {
        let mut slot = self.slot(sensor_id)?.write().await;

        if slot.active != Some(generation) {
            tracing::debug!(
                sensor = %sensor_id,
                generation = %generation,
                active = ?slot.active.map(|g| g.value()),
                "Discarding stale emission"
            );
            return Ok(false);
        }

        slot.reading = reading.clone();
        drop(slot);

        let _ = self.updates_tx.send(ReadingUpdate {
            sensor_id: sensor_id.to_string(),
            generation,
            reading,
        });

        Ok(true)
    }

    /// Issue a fresh generation and make it the only one allowed to write
    pub async fn open_generation(&self, sensor_id: &str) -> SensorResult<Generation> {
        let mut slot = self.slot(sensor_id)?.write().await;
        slot.issued += 1;
        let generation = Generation(slot.issued);
        slot.active = Some(generation);
        Ok(generation)
    }

    /// Stop accepting writes from `generation`
    ///
    /// A no-op if a newer generation has already been opened.
    pub async fn close_generation(
        &self,
        sensor_id: &str,
        generation: Generation,
    ) -> SensorResult<()> {
        let mut slot = self.slot(sensor_id)?.write().await;
        if slot.active == Some(generation) {
            slot.active = None;
        }
        Ok(())
    }

    pub async fn active_generation(&self, sensor_id: &str) -> SensorResult<Option<Generation>> {
        Ok(self.slot(sensor_id)?.read().await.active)
    }

    /// Copy of every cached reading
    pub async fn snapshot(&self) -> HashMap<String, Reading> {
        let mut out = HashMap::with_capacity(self.slots.len());
        for (id, slot) in &self.slots {
            out.insert(id.clone(), slot.read().await.reading.clone());
        }
        out
    }

    /// Subscribe to accepted writes
    pub fn updates(&self) -> broadcast::Receiver<ReadingUpdate> {
        self.updates_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::Sample;
    use chrono::Utc;
    use std::sync::Arc;

    fn motion(x: f64) -> Reading {
        Reading::stamped(Sample::Motion { x, y: 0.0, z: 0.0 }, Utc::now())
    }

    #[tokio::test]
    async fn test_get_returns_zero_value() {
        let store = ReadingStore::new(&SensorRegistry::standard());

        let reading = store.get("gps").await.unwrap();
        assert!(reading.as_gps().is_some());
        assert!(!reading.has_timestamp());

        assert!(matches!(
            store.get("unknown-sensor").await,
            Err(SensorError::UnknownSensor(_))
        ));
    }

    #[tokio::test]
    async fn test_set_requires_active_generation() {
        let store = ReadingStore::new(&SensorRegistry::standard());

        // No generation opened yet
        assert!(!store
            .set("accelerometer", motion(1.0), Generation(1))
            .await
            .unwrap());

        let generation = store.open_generation("accelerometer").await.unwrap();
        assert!(store
            .set("accelerometer", motion(1.0), generation)
            .await
            .unwrap());
        let reading = store.get("accelerometer").await.unwrap();
        assert_eq!(reading.as_motion().unwrap().x, 1.0);
    }

    #[tokio::test]
    async fn test_closed_generation_is_stale() {
        let store = ReadingStore::new(&SensorRegistry::standard());

        let generation = store.open_generation("gyroscope").await.unwrap();
        store.set("gyroscope", motion(1.0), generation).await.unwrap();
        store.close_generation("gyroscope", generation).await.unwrap();

        assert!(!store.set("gyroscope", motion(9.0), generation).await.unwrap());
        assert_eq!(
            store.get("gyroscope").await.unwrap().as_motion().unwrap().x,
            1.0
        );
        assert_eq!(store.active_generation("gyroscope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_generations_are_monotonic() {
        let store = ReadingStore::new(&SensorRegistry::standard());

        let first = store.open_generation("magnetometer").await.unwrap();
        store.close_generation("magnetometer", first).await.unwrap();
        let second = store.open_generation("magnetometer").await.unwrap();
        assert!(second > first);

        // Closing an old generation must not retire the new one
        store.close_generation("magnetometer", first).await.unwrap();
        assert_eq!(
            store.active_generation("magnetometer").await.unwrap(),
            Some(second)
        );
        assert!(!store.set("magnetometer", motion(5.0), first).await.unwrap());
        assert!(store.set("magnetometer", motion(6.0), second).await.unwrap());
    }

    #[tokio::test]
    async fn test_updates_feed_only_accepted_writes() {
        let store = ReadingStore::new(&SensorRegistry::standard());
        let mut updates = store.updates();

        let generation = store.open_generation("accelerometer").await.unwrap();
        store.set("accelerometer", motion(2.0), generation).await.unwrap();
        store
            .set("accelerometer", motion(3.0), Generation(99))
            .await
            .unwrap();

        let update = updates.try_recv().unwrap();
        assert_eq!(update.sensor_id, "accelerometer");
        assert_eq!(update.generation, generation);
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slots_are_independent() {
        let store = Arc::new(ReadingStore::new(&SensorRegistry::standard()));

        // Hold one sensor's slot while writing another
        let held = store.slot("gps").unwrap().write().await;

        let generation = store.open_generation("barometer").await.unwrap();
        let reading = Reading::stamped(Sample::Pressure { pressure: 1000.0 }, Utc::now());
        assert!(store.set("barometer", reading, generation).await.unwrap());

        drop(held);
    }
}
