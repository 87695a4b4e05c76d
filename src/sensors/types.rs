//! Core data types for sensor readings
//!
//! This module defines the values that flow from sources into the store:
//! - `SensorCategory`: what kind of hardware produces the samples
//! - `Sample`: a raw emission, before it is stamped
//! - `Reading`: the cached, timestamped value that gets dispatched

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Category of sensor, which fixes the shape of its payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SensorCategory {
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Gps,
    Barometer,
}

impl SensorCategory {
    /// Get all categories for iteration
    pub fn all() -> &'static [SensorCategory] {
        &[
            SensorCategory::Accelerometer,
            SensorCategory::Gyroscope,
            SensorCategory::Magnetometer,
            SensorCategory::Gps,
            SensorCategory::Barometer,
        ]
    }

    /// Motion sensors all report a three-axis vector
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            SensorCategory::Accelerometer | SensorCategory::Gyroscope | SensorCategory::Magnetometer
        )
    }
}

impl std::fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorCategory::Accelerometer => write!(f, "accelerometer"),
            SensorCategory::Gyroscope => write!(f, "gyroscope"),
            SensorCategory::Magnetometer => write!(f, "magnetometer"),
            SensorCategory::Gps => write!(f, "gps"),
            SensorCategory::Barometer => write!(f, "barometer"),
        }
    }
}

/// A raw emission from a source, not yet stamped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Motion { x: f64, y: f64, z: f64 },
    Position { latitude: f64, longitude: f64 },
    Pressure { pressure: f64 },
}

impl Sample {
    /// Whether this sample has the payload shape `category` expects
    pub fn fits(&self, category: SensorCategory) -> bool {
        match self {
            Sample::Motion { .. } => category.is_motion(),
            Sample::Position { .. } => category == SensorCategory::Gps,
            Sample::Pressure { .. } => category == SensorCategory::Barometer,
        }
    }
}

/// Three-axis motion reading (accelerometer, gyroscope, magnetometer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: String,
}

/// Location fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsReading {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
}

/// Barometric pressure in hPa
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureReading {
    pub pressure: f64,
    pub timestamp: String,
}

/// The latest timestamped value for one sensor
///
/// Serialized untagged, so the wire shape is exactly the payload fields plus
/// `timestamp`, e.g. `{"x":1.0,"y":2.0,"z":3.0,"timestamp":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Motion(MotionReading),
    Gps(GpsReading),
    Pressure(PressureReading),
}

impl Reading {
    /// The value a sensor reports before its first emission
    pub fn zero(category: SensorCategory) -> Self {
        match category {
            SensorCategory::Gps => Reading::Gps(GpsReading {
                latitude: 0.0,
                longitude: 0.0,
                timestamp: String::new(),
            }),
            SensorCategory::Barometer => Reading::Pressure(PressureReading {
                pressure: 0.0,
                timestamp: String::new(),
            }),
            _ => Reading::Motion(MotionReading {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                timestamp: String::new(),
            }),
        }
    }

    /// Stamp a raw sample with the time it was observed
    pub fn stamped(sample: Sample, at: DateTime<Utc>) -> Self {
        let timestamp = format_timestamp(at);
        match sample {
            Sample::Motion { x, y, z } => Reading::Motion(MotionReading { x, y, z, timestamp }),
            Sample::Position {
                latitude,
                longitude,
            } => Reading::Gps(GpsReading {
                latitude,
                longitude,
                timestamp,
            }),
            Sample::Pressure { pressure } => {
                Reading::Pressure(PressureReading { pressure, timestamp })
            }
        }
    }

    /// Whether this reading has the payload shape `category` produces
    pub fn fits(&self, category: SensorCategory) -> bool {
        match self {
            Reading::Motion(_) => category.is_motion(),
            Reading::Gps(_) => category == SensorCategory::Gps,
            Reading::Pressure(_) => category == SensorCategory::Barometer,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            Reading::Motion(r) => &r.timestamp,
            Reading::Gps(r) => &r.timestamp,
            Reading::Pressure(r) => &r.timestamp,
        }
    }

    /// False until the sensor has emitted at least once
    pub fn has_timestamp(&self) -> bool {
        !self.timestamp().is_empty()
    }

    pub fn as_motion(&self) -> Option<&MotionReading> {
        match self {
            Reading::Motion(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_gps(&self) -> Option<&GpsReading> {
        match self {
            Reading::Gps(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_pressure(&self) -> Option<&PressureReading> {
        match self {
            Reading::Pressure(r) => Some(r),
            _ => None,
        }
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_zero_reading_has_no_timestamp() {
        for category in SensorCategory::all() {
            let reading = Reading::zero(*category);
            assert!(!reading.has_timestamp(), "{category} zero value is stamped");
        }
        assert!(Reading::zero(SensorCategory::Gps).as_gps().is_some());
        assert!(Reading::zero(SensorCategory::Barometer).as_pressure().is_some());
        assert!(Reading::zero(SensorCategory::Gyroscope).as_motion().is_some());
    }

    #[test]
    fn test_stamped_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let reading = Reading::stamped(Sample::Pressure { pressure: 1013.2 }, at);
        assert_eq!(reading.timestamp(), "2024-05-01T12:30:00.000Z");
    }

    #[test]
    fn test_wire_shape_is_untagged() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let reading = Reading::stamped(
            Sample::Position {
                latitude: 37.5,
                longitude: 127.0,
            },
            at,
        );

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "latitude": 37.5,
                "longitude": 127.0,
                "timestamp": "2024-05-01T12:30:00.000Z",
            })
        );
    }

    #[test]
    fn test_sample_fits_category() {
        let motion = Sample::Motion { x: 1.0, y: 2.0, z: 3.0 };
        assert!(motion.fits(SensorCategory::Magnetometer));
        assert!(!motion.fits(SensorCategory::Gps));
        assert!(Sample::Pressure { pressure: 1.0 }.fits(SensorCategory::Barometer));
        assert!(!Sample::Pressure { pressure: 1.0 }.fits(SensorCategory::Accelerometer));
    }

    #[test]
    fn test_reading_fits_category() {
        let gps = Reading::zero(SensorCategory::Gps);
        assert!(gps.fits(SensorCategory::Gps));
        assert!(!gps.fits(SensorCategory::Accelerometer));
        assert!(Reading::zero(SensorCategory::Gyroscope).fits(SensorCategory::Magnetometer));
        assert!(!Reading::zero(SensorCategory::Barometer).fits(SensorCategory::Gps));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(SensorCategory::Gps.to_string(), "gps");
        assert_eq!(SensorCategory::Barometer.to_string(), "barometer");
    }
}
