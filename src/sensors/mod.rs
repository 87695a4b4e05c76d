//! Sensor catalog and reading types
//!
//! - [`SensorRegistry`]: which sensors exist and how often they sample
//! - [`Reading`]: the timestamped, category-tagged value cached per sensor
//! - [`SensorError`]: errors surfaced by the lifecycle API

mod error;
mod registry;
mod types;

pub use error::{SensorError, SensorResult};
pub use registry::{SensorDescriptor, SensorRegistry, DEFAULT_SAMPLING_INTERVAL_MS};
pub use types::{
    format_timestamp, GpsReading, MotionReading, PressureReading, Reading, Sample,
    SensorCategory,
};
