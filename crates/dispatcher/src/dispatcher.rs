//! FanoutDispatcher - inline time-series write plus async prediction

use std::collections::BTreeSet;
use std::sync::Arc;

use contracts::{
    ContractError, CorrelationContext, PointTimestamp, PredictionClient, PredictionRequest,
    ReadingDispatcher, SensorReading, SensorType, TimeSeriesConfig, TimeSeriesKind,
    TimeSeriesPoint, TimeSeriesSink,
};
use tracing::{debug, error, instrument, warn};

use crate::error::DispatcherError;
use crate::metrics::{SinkMetrics, SinkSnapshot};
use crate::pool::WorkerPool;
use crate::sinks::{InfluxSink, LogSink};

/// Sends each reading to the time-series sink and, for model-relevant
/// types, to the prediction worker pool
pub struct FanoutDispatcher<S, P> {
    sink: Arc<S>,
    pool: Arc<WorkerPool<P>>,
    model_types: BTreeSet<SensorType>,
    timestamp: PointTimestamp,
    sink_metrics: SinkMetrics,
}

impl<S, P> FanoutDispatcher<S, P>
where
    S: TimeSeriesSink + Sync + 'static,
    P: PredictionClient + Sync + 'static,
{
    pub fn new(
        sink: Arc<S>,
        pool: Arc<WorkerPool<P>>,
        model_types: impl IntoIterator<Item = SensorType>,
    ) -> Self {
        Self {
            sink,
            pool,
            model_types: model_types.into_iter().collect(),
            timestamp: PointTimestamp::default(),
            sink_metrics: SinkMetrics::new(),
        }
    }

    /// Choose which reading time stamps the time-series point
    pub fn with_point_timestamp(mut self, timestamp: PointTimestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// True if readings of this type go to the prediction service
    pub fn is_model_relevant(&self, sensor_type: SensorType) -> bool {
        self.model_types.contains(&sensor_type)
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub fn pool(&self) -> &Arc<WorkerPool<P>> {
        &self.pool
    }

    pub fn sink_metrics(&self) -> SinkSnapshot {
        self.sink_metrics.snapshot()
    }

    async fn write_point(&self, reading: &SensorReading, ctx: &CorrelationContext) {
        let point = TimeSeriesPoint::from_reading_at(reading, self.timestamp);
        match self.sink.write(&point).await {
            Ok(()) => {
                self.sink_metrics.inc_write_count();
                observability::record_sink_write(self.sink.name(), true);
            }
            Err(e) => {
                self.sink_metrics.inc_failure_count();
                observability::record_sink_write(self.sink.name(), false);
                error!(
                    sink = self.sink.name(),
                    trace_id = %ctx.trace_id(),
                    message_id = %ctx.message_id(),
                    error = %e,
                    "time-series write failed"
                );
            }
        }
    }
}

impl<S, P> ReadingDispatcher for FanoutDispatcher<S, P>
where
    S: TimeSeriesSink + Sync + 'static,
    P: PredictionClient + Sync + 'static,
{
    #[instrument(
        name = "fanout_dispatch",
        skip(self, reading, ctx),
        fields(location = reading.location(), sensor_type = reading.sensor_type().as_str())
    )]
    async fn dispatch(&self, reading: SensorReading, ctx: CorrelationContext) {
        self.write_point(&reading, &ctx).await;

        if !self.is_model_relevant(reading.sensor_type()) {
            debug!("not model relevant, prediction skipped");
            return;
        }

        let request = PredictionRequest::from(&reading);
        let trace_id = ctx.trace_id().to_string();
        if let Err(e) = self.pool.submit(request, ctx).await {
            warn!(trace_id = %trace_id, error = %e, "prediction task not queued");
        }
    }
}

/// Sink selected by `time_series.kind`
pub enum ConfiguredSink {
    Influx(InfluxSink),
    Log(LogSink),
}

impl TimeSeriesSink for ConfiguredSink {
    fn name(&self) -> &str {
        match self {
            Self::Influx(sink) => sink.name(),
            Self::Log(sink) => sink.name(),
        }
    }

    async fn write(&self, point: &TimeSeriesPoint) -> Result<(), ContractError> {
        match self {
            Self::Influx(sink) => sink.write(point).await,
            Self::Log(sink) => sink.write(point).await,
        }
    }

    async fn flush(&self) -> Result<(), ContractError> {
        match self {
            Self::Influx(sink) => sink.flush().await,
            Self::Log(sink) => sink.flush().await,
        }
    }

    async fn close(&self) -> Result<(), ContractError> {
        match self {
            Self::Influx(sink) => sink.close().await,
            Self::Log(sink) => sink.close().await,
        }
    }
}

/// Create the time-series sink from configuration
#[instrument(name = "dispatcher_create_sink", skip(config), fields(kind = ?config.kind))]
pub fn create_time_series_sink(config: &TimeSeriesConfig) -> Result<ConfiguredSink, DispatcherError> {
    match config.kind {
        TimeSeriesKind::Influx => InfluxSink::new("influx", config)
            .map(ConfiguredSink::Influx)
            .map_err(|e| DispatcherError::sink_creation("influx", e.to_string())),
        TimeSeriesKind::Log => Ok(ConfiguredSink::Log(LogSink::new("log"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::RecordingPredictionClient;
    use crate::sinks::MemorySink;
    use contracts::WorkerPoolConfig;
    use std::time::Duration;

    type Fixture = (
        FanoutDispatcher<MemorySink, RecordingPredictionClient>,
        MemorySink,
        Arc<RecordingPredictionClient>,
    );

    fn fixture() -> Fixture {
        let sink = MemorySink::new();
        let client = Arc::new(RecordingPredictionClient::new());
        let pool = Arc::new(WorkerPool::start(
            Arc::clone(&client),
            &WorkerPoolConfig::default(),
        ));
        let dispatcher =
            FanoutDispatcher::new(Arc::new(sink.clone()), pool, SensorType::MODEL_DEFAULTS);
        (dispatcher, sink, client)
    }

    async fn drain(dispatcher: &FanoutDispatcher<MemorySink, RecordingPredictionClient>) {
        dispatcher.pool().shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_model_type_writes_and_predicts() {
        let (dispatcher, sink, client) = fixture();
        let reading = SensorReading::new("roomA", SensorType::Temperature, 23.5, 1_700_000_000_000);
        let ctx = CorrelationContext::with_ids("t-1", "m-1", "test");

        dispatcher.dispatch(reading, ctx).await;
        drain(&dispatcher).await;

        let points = sink.points();
        assert_eq!(points.len(), 1);
        assert_eq!(
            points[0].to_line_protocol(),
            "sensor,location=roomA,type=temperature value=23.5 1700000000000"
        );

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request.location, "roomA");
        assert_eq!(calls[0].trace_id, "t-1");
        assert_eq!(dispatcher.sink_metrics().write_count, 1);
    }

    #[tokio::test]
    async fn test_non_model_type_only_written() {
        let (dispatcher, sink, client) = fixture();
        let reading = SensorReading::new("roomA", SensorType::Battery, 88.0, 0);

        dispatcher.dispatch(reading, CorrelationContext::new("test")).await;
        drain(&dispatcher).await;

        assert_eq!(sink.len(), 1);
        assert_eq!(client.call_count(), 0);
        assert_eq!(dispatcher.pool().snapshot().submitted, 0);
    }

    #[tokio::test]
    async fn test_sink_failure_still_predicts() {
        let (dispatcher, sink, client) = fixture();
        sink.set_failing(true);
        let reading = SensorReading::new("roomB", SensorType::Co2, 900.0, 0);

        dispatcher.dispatch(reading, CorrelationContext::new("test")).await;
        drain(&dispatcher).await;

        assert!(sink.is_empty());
        assert_eq!(client.call_count(), 1);
        assert_eq!(dispatcher.sink_metrics().failure_count, 1);
    }

    #[tokio::test]
    async fn test_received_time_stamps_point() {
        let (dispatcher, sink, _client) = fixture();
        let dispatcher = dispatcher.with_point_timestamp(PointTimestamp::Received);
        let reading = SensorReading::new("roomA", SensorType::Battery, 88.0, 1_000)
            .with_received_at(5_000);

        dispatcher.dispatch(reading, CorrelationContext::new("test")).await;
        drain(&dispatcher).await;

        assert_eq!(sink.points()[0].timestamp_millis, 5_000);
    }

    #[tokio::test]
    async fn test_closed_pool_does_not_panic() {
        let (dispatcher, sink, client) = fixture();
        drain(&dispatcher).await;

        let reading = SensorReading::new("roomA", SensorType::Humidity, 40.0, 0);
        dispatcher.dispatch(reading, CorrelationContext::new("test")).await;

        assert_eq!(sink.len(), 1);
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn test_configured_sink_kind() {
        let mut config = TimeSeriesConfig::default();
        config.kind = TimeSeriesKind::Log;
        let sink = create_time_series_sink(&config).unwrap();
        assert_eq!(sink.name(), "log");

        config.kind = TimeSeriesKind::Influx;
        let sink = create_time_series_sink(&config).unwrap();
        assert_eq!(sink.name(), "influx");
    }
}
