//! Sensor Registry
//!
//! Static catalog of the sensors this device exposes.

use std::collections::HashMap;

use super::error::{SensorError, SensorResult};
use super::types::{Reading, SensorCategory};

/// Default sampling interval for every sensor (1 second)
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1000;

/// Immutable description of one sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub id: String,
    pub category: SensorCategory,
    pub sampling_interval_ms: u64,
}

impl SensorDescriptor {
    pub fn new(id: impl Into<String>, category: SensorCategory) -> Self {
        Self {
            id: id.into(),
            category,
            sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
        }
    }

    /// Builder method: set sampling interval
    pub fn sampling_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sampling_interval_ms = interval_ms;
        self
    }

    pub fn sampling_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sampling_interval_ms)
    }

    /// Reading reported before the first emission
    pub fn zero_reading(&self) -> Reading {
        Reading::zero(self.category)
    }
}

/// Lookup table from sensor id to descriptor
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    descriptors: Vec<SensorDescriptor>,
    index: HashMap<String, usize>,
}

impl SensorRegistry {
    /// Build a registry from descriptors; later duplicates replace earlier ones
    pub fn new(descriptors: impl IntoIterator<Item = SensorDescriptor>) -> Self {
        let mut registry = Self {
            descriptors: Vec::new(),
            index: HashMap::new(),
        };

        for descriptor in descriptors {
            match registry.index.get(&descriptor.id) {
                Some(&pos) => registry.descriptors[pos] = descriptor,
                None => {
                    registry
                        .index
                        .insert(descriptor.id.clone(), registry.descriptors.len());
                    registry.descriptors.push(descriptor);
                }
            }
        }

        registry
    }

    /// One sensor per category, named after the category
    pub fn standard() -> Self {
        Self::new(
            SensorCategory::all()
                .iter()
                .map(|category| SensorDescriptor::new(category.to_string(), *category)),
        )
    }

    /// Same registry with per-sensor sampling intervals replaced
    pub fn with_intervals(mut self, intervals: &HashMap<String, u64>) -> SensorResult<Self> {
        for (id, interval_ms) in intervals {
            let pos = *self
                .index
                .get(id)
                .ok_or_else(|| SensorError::UnknownSensor(id.clone()))?;
            self.descriptors[pos].sampling_interval_ms = *interval_ms;
        }
        Ok(self)
    }

    pub fn descriptor_of(&self, sensor_id: &str) -> SensorResult<&SensorDescriptor> {
        self.index
            .get(sensor_id)
            .map(|&pos| &self.descriptors[pos])
            .ok_or_else(|| SensorError::UnknownSensor(sensor_id.to_string()))
    }

    pub fn contains(&self, sensor_id: &str) -> bool {
        self.index.contains_key(sensor_id)
    }

    /// Descriptors in registration order
    pub fn descriptors(&self) -> &[SensorDescriptor] {
        &self.descriptors
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
