//! TimeSeriesPoint - what the dispatcher hands to the time-series sink

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::{PointTimestamp, SensorReading};

/// Measurement name used for every reading
pub const SENSOR_MEASUREMENT: &str = "sensor";

/// One time-series point
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesPoint {
    /// Measurement name
    pub measurement: String,

    /// Tag set (ordered for stable rendering)
    pub tags: BTreeMap<String, String>,

    /// Single float field `value`
    pub value: f64,

    /// Timestamp in epoch milliseconds
    pub timestamp_millis: i64,
}

impl TimeSeriesPoint {
    /// Build the `sensor` point for a reading: tags `location` and `type`,
    /// stamped with the payload observation time
    pub fn from_reading(reading: &SensorReading) -> Self {
        Self::from_reading_at(reading, PointTimestamp::Observed)
    }

    pub fn from_reading_at(reading: &SensorReading, timestamp: PointTimestamp) -> Self {
        let timestamp_millis = match timestamp {
            PointTimestamp::Observed => reading.observed_at_epoch_millis(),
            PointTimestamp::Received => reading.received_at_epoch_millis(),
        };

        let mut tags = BTreeMap::new();
        tags.insert("location".to_string(), reading.location().to_string());
        tags.insert("type".to_string(), reading.sensor_type().as_str().to_string());

        Self {
            measurement: SENSOR_MEASUREMENT.to_string(),
            tags,
            value: reading.value(),
            timestamp_millis,
        }
    }

    /// Render as InfluxDB line protocol with millisecond precision
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);
        for (key, value) in &self.tags {
            // Infallible for String
            let _ = write!(line, ",{}={}", escape_tag(key), escape_tag(value));
        }
        let _ = write!(line, " value={} {}", self.value, self.timestamp_millis);
        line
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
