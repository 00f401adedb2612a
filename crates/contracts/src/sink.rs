//! TimeSeriesSink / PredictionClient - Dispatcher output interfaces
//!
//! Defines the abstract interfaces for the two fan-out targets.

use serde::Serialize;

use crate::{ContractError, CorrelationContext, SensorReading, SensorType, TimeSeriesPoint};

/// Time-series output trait
///
/// Shared between the message path and shutdown, so every method takes `&self`.
#[trait_variant::make(TimeSeriesSink: Send)]
pub trait LocalTimeSeriesSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one point
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&self, point: &TimeSeriesPoint) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&self) -> Result<(), ContractError>;
}

/// JSON envelope sent to the prediction service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRequest {
    pub location: String,
    pub sensor_type: SensorType,
    pub value: f64,
}

impl From<&SensorReading> for PredictionRequest {
    fn from(reading: &SensorReading) -> Self {
        Self {
            location: reading.location().to_string(),
            sensor_type: reading.sensor_type(),
            value: reading.value(),
        }
    }
}

/// Remote prediction collaborator
#[trait_variant::make(PredictionClient: Send)]
pub trait LocalPredictionClient {
    /// Endpoint description (used for logging)
    fn endpoint(&self) -> &str;

    /// Deliver one request; any 2xx is success, the body is not consumed
    ///
    /// # Errors
    /// `DispatchRejected` for 4xx answers, `DispatchFailed` for everything else
    async fn predict(
        &self,
        request: &PredictionRequest,
        ctx: &CorrelationContext,
    ) -> Result<(), ContractError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_envelope_shape() {
        let reading = SensorReading::new("roomA", SensorType::Humidity, 41.0, 0);
        let json = serde_json::to_value(PredictionRequest::from(&reading)).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"location": "roomA", "sensor_type": "humidity", "value": 41.0})
        );
    }
}
