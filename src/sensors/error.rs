//! Sensor error types
//!
//! Errors surfaced to callers of the lifecycle API. None of them are fatal:
//! they are reported and the affected sensor stays where it was.

use thiserror::Error;

/// Errors that can occur while toggling or querying a sensor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// The id is not in the registry (caller bug)
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    /// The underlying source could not be opened
    #[error("Sensor {sensor} is not available: {reason}")]
    SensorUnavailable { sensor: String, reason: String },

    /// The platform refused access (location)
    #[error("Permission denied for sensor {sensor}")]
    PermissionDenied { sensor: String },
}

/// Result type alias for sensor operations
pub type SensorResult<T> = Result<T, SensorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SensorError::UnknownSensor("thermometer".to_string());
        assert_eq!(err.to_string(), "Unknown sensor: thermometer");

        let err = SensorError::SensorUnavailable {
            sensor: "barometer".to_string(),
            reason: "no hardware".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Sensor barometer is not available: no hardware"
        );

        let err = SensorError::PermissionDenied {
            sensor: "gps".to_string(),
        };
        assert_eq!(err.to_string(), "Permission denied for sensor gps");
    }
}
