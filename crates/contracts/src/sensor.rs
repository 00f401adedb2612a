//! SensorReading / RawMessage - ingestion input and output
//!
//! A `RawMessage` is what the transport hands over; a `SensorReading` is
//! what the router and decoder make of it.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Known telemetry sensor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    Co2,
    Battery,
    Illumination,
}

impl SensorType {
    /// Every recognized sensor type
    pub const ALL: [SensorType; 5] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Co2,
        SensorType::Battery,
        SensorType::Illumination,
    ];

    /// Types forwarded to the prediction service unless configured otherwise
    pub const MODEL_DEFAULTS: [SensorType; 3] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Co2,
    ];

    /// Wire name, as it appears in topics and payload keys
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Co2 => "co2",
            SensorType::Battery => "battery",
            SensorType::Illumination => "illumination",
        }
    }

    /// Human-readable name for log lines
    pub fn display_name(&self) -> &'static str {
        match self {
            SensorType::Temperature => "Temperature",
            SensorType::Humidity => "Humidity",
            SensorType::Co2 => "CO2",
            SensorType::Battery => "Battery",
            SensorType::Illumination => "Illumination",
        }
    }

    /// Measurement unit
    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::Humidity | SensorType::Battery => "%",
            SensorType::Co2 => "ppm",
            SensorType::Illumination => "lux",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known sensor type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sensor type '{0}'")]
pub struct UnknownSensorType(pub String);

impl FromStr for SensorType {
    type Err = UnknownSensorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownSensorType(s.to_string()))
    }
}

/// A decoded telemetry reading
///
/// Immutable once constructed; consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    location: String,
    sensor_type: SensorType,
    value: f64,
    observed_at_epoch_millis: i64,
    received_at_epoch_millis: i64,
}

impl SensorReading {
    /// Receive time defaults to the observation time until
    /// [`with_received_at`](Self::with_received_at) sets it.
    pub fn new(
        location: impl Into<String>,
        sensor_type: SensorType,
        value: f64,
        observed_at_epoch_millis: i64,
    ) -> Self {
        Self {
            location: location.into(),
            sensor_type,
            value,
            observed_at_epoch_millis,
            received_at_epoch_millis: observed_at_epoch_millis,
        }
    }

    /// Stamp the local time the underlying message arrived
    pub fn with_received_at(mut self, received_at_epoch_millis: i64) -> Self {
        self.received_at_epoch_millis = received_at_epoch_millis;
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn observed_at_epoch_millis(&self) -> i64 {
        self.observed_at_epoch_millis
    }

    pub fn received_at_epoch_millis(&self) -> i64 {
        self.received_at_epoch_millis
    }
}

/// Message as delivered by the transport
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Topic the message was published on
    pub topic: String,

    /// Message body (zero-copy)
    pub payload: Bytes,

    /// Local receive time
    pub received_at_epoch_millis: i64,
}

impl RawMessage {
    /// Create a message stamped with the current wall-clock time
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at_epoch_millis: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_type_round_trip_names() {
        for t in SensorType::ALL {
            assert_eq!(t.as_str().parse::<SensorType>().unwrap(), t);
        }
        assert!("lora".parse::<SensorType>().is_err());
        assert!("Temperature".parse::<SensorType>().is_err());
    }

    #[test]
    fn test_sensor_type_serde_name() {
        let json = serde_json::to_string(&SensorType::Co2).unwrap();
        assert_eq!(json, "\"co2\"");
    }

    #[test]
    fn test_unknown_sensor_type_message() {
        let err = "pressure".parse::<SensorType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown sensor type 'pressure'");
    }

    #[test]
    fn test_received_at_defaults_to_observed() {
        let reading = SensorReading::new("roomA", SensorType::Co2, 400.0, 1_000);
        assert_eq!(reading.received_at_epoch_millis(), 1_000);

        let reading = reading.with_received_at(1_250);
        assert_eq!(reading.observed_at_epoch_millis(), 1_000);
        assert_eq!(reading.received_at_epoch_millis(), 1_250);
    }

    #[test]
    fn test_units() {
        assert_eq!(SensorType::Co2.unit(), "ppm");
        assert_eq!(SensorType::Battery.unit(), "%");
    }
}
