//! Ingestion Pipeline main entry
//!
//! Composition root for one inbound message:
//! correlation context → route → decode → reading → dispatch.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use contracts::{CorrelationContext, MessageHandler, RawMessage, ReadingDispatcher, SensorReading};
use tracing::{debug, info, instrument, warn, Instrument};

use crate::config::{IngestionMetrics, PipelineConfig};
use crate::decoder::decode;
use crate::error::IngestionError;
use crate::router::{Route, TopicRouter};

/// Result of processing one message
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Decoded and handed to the dispatcher
    Dispatched(SensorReading),
    /// Not a telemetry reading, dropped before decode
    Skipped { sensor_type: String },
    /// Classified failure, nothing written
    Rejected(IngestionError),
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dispatched(_) => "dispatched",
            Self::Skipped { .. } => "skipped",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Ingestion Pipeline
///
/// Registered with the connection supervisor as its `MessageHandler`.
/// Holds no per-message state, so concurrent `handle` calls are safe.
pub struct IngestionPipeline<D> {
    router: TopicRouter,
    dispatcher: D,
    config: PipelineConfig,
    metrics: Arc<IngestionMetrics>,
}

impl<D: ReadingDispatcher + Sync> IngestionPipeline<D> {
    /// Create new Ingestion Pipeline
    pub fn new(config: PipelineConfig, dispatcher: D) -> Self {
        Self {
            router: TopicRouter::new(config.unknown_sensor_policy),
            dispatcher,
            config,
            metrics: Arc::new(IngestionMetrics::new()),
        }
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Process one message under a fresh correlation context
    pub async fn process(&self, message: RawMessage) -> ProcessOutcome {
        let ctx = CorrelationContext::new(&self.config.source);
        let span = ctx.span("ingest");
        let started = Instant::now();

        let outcome = self.process_in_context(message, ctx).instrument(span).await;

        self.record(&outcome);
        observability::record_handle_latency_ms(started.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn process_in_context(&self, message: RawMessage, ctx: CorrelationContext) -> ProcessOutcome {
        self.metrics.record_received();
        observability::record_message_received();
        debug!(
            topic = %message.topic,
            payload = %String::from_utf8_lossy(&message.payload),
            "message received"
        );

        let (location, sensor_type) = match self.router.route(&message.topic) {
            Ok(Route::Telemetry {
                location,
                sensor_type,
            }) => (location, sensor_type),
            Ok(Route::Skip { sensor_type }) => return ProcessOutcome::Skipped { sensor_type },
            Err(e) => return ProcessOutcome::Rejected(e),
        };

        let decoded = match decode(&message.payload, sensor_type) {
            Ok(decoded) => decoded,
            Err(e) => return ProcessOutcome::Rejected(e),
        };

        let reading = SensorReading::new(
            location,
            sensor_type,
            decoded.value,
            decoded.observed_at_epoch_millis,
        )
        .with_received_at(message.received_at_epoch_millis);

        info!(
            location = %reading.location(),
            observed_at = %format_observed_at(reading.observed_at_epoch_millis()),
            sensor = reading.sensor_type().display_name(),
            sensor_type = %reading.sensor_type(),
            value = reading.value(),
            unit = reading.sensor_type().unit(),
            "{} @ {}: {} {}",
            reading.sensor_type().display_name(),
            reading.location(),
            reading.value(),
            reading.sensor_type().unit(),
        );

        self.dispatcher.dispatch(reading.clone(), ctx).await;
        ProcessOutcome::Dispatched(reading)
    }

    fn record(&self, outcome: &ProcessOutcome) {
        let reason = match outcome {
            ProcessOutcome::Dispatched(_) => {
                self.metrics.record_dispatched();
                "ok"
            }
            ProcessOutcome::Skipped { .. } => {
                self.metrics.record_skipped();
                "not_telemetry"
            }
            ProcessOutcome::Rejected(e) => {
                self.metrics.record_rejected(e);
                e.kind()
            }
        };
        observability::record_message_outcome(outcome.label(), reason);
    }
}

impl<D: ReadingDispatcher + Sync> MessageHandler for IngestionPipeline<D> {
    #[instrument(name = "ingestion_handle", skip_all, fields(topic = %message.topic))]
    async fn handle(&self, message: RawMessage) {
        match self.process(message).await {
            ProcessOutcome::Dispatched(_) => {}
            ProcessOutcome::Skipped { sensor_type } => {
                debug!(sensor_type = %sensor_type, "non-telemetry message skipped");
            }
            ProcessOutcome::Rejected(e) => {
                warn!(error = %e, kind = e.kind(), "message rejected");
            }
        }
    }
}

/// `yyyy-MM-dd HH:mm:ss` in UTC; raw millis if out of range
fn format_observed_at(epoch_millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_millis.to_string())
}
