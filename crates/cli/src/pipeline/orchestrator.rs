//! Pipeline orchestrator - wires transport, supervisor, ingestion and dispatch.
//!
//! Supports both a real broker and mock mode. Without the `real-mqtt`
//! feature only mock mode is available.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use connection::{
    ConnectionSupervisor, MockTransport, MockTransportConfig, MqttTransport, SupervisorSettings,
};
use contracts::{PipelineBlueprint, PredictionClient, SensorType, TimeSeriesSink};
use dispatcher::{create_time_series_sink, FanoutDispatcher, LogPredictionClient, WorkerPool};
use ingestion::IngestionPipeline;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::PipelineStats;
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validated blueprint
    pub blueprint: PipelineBlueprint,

    /// Use the in-process mock broker
    pub mock: bool,

    /// Interval between generated sample readings (mock mode)
    pub mock_interval: Duration,

    /// Stop after this long (None = until signalled)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves (or the timeout elapses), then stop in order
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()> + Send,
    {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let blueprint = &self.config.blueprint;
        let client_id = connection::generate_client_id(&blueprint.broker.client_id_prefix);

        if self.config.mock {
            info!(client_id = %client_id, "Running in MOCK mode (no broker required)");
            let transport = Arc::new(MockTransport::with_config(MockTransportConfig {
                client_id,
                event_capacity: blueprint.broker.event_capacity,
            }));
            let feeder = spawn_sample_feeder(Arc::clone(&transport), self.config.mock_interval);
            let stats = self
                .run_with(transport, Arc::new(LogPredictionClient), shutdown)
                .await;
            feeder.abort();
            return stats;
        }

        self.run_real(client_id, shutdown).await
    }

    #[cfg(feature = "real-mqtt")]
    async fn run_real<F>(&self, client_id: String, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()> + Send,
    {
        let blueprint = &self.config.blueprint;
        info!(broker = %blueprint.broker.url, client_id = %client_id, "Connecting to MQTT broker...");

        let transport = Arc::new(
            connection::RumqttTransport::new(&blueprint.broker, client_id)
                .context("Failed to create MQTT transport")?,
        );
        let prediction = Arc::new(
            dispatcher::HttpPredictionClient::new(&blueprint.prediction)
                .context("Failed to create prediction client")?,
        );
        self.run_with(transport, prediction, shutdown).await
    }

    #[cfg(not(feature = "real-mqtt"))]
    async fn run_real<F>(&self, _client_id: String, _shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()> + Send,
    {
        Err(CliError::TransportUnavailable.into())
    }

    /// Shared wiring for mock and real transports
    async fn run_with<T, P, F>(
        &self,
        transport: Arc<T>,
        prediction: Arc<P>,
        shutdown: F,
    ) -> Result<PipelineStats>
    where
        T: MqttTransport,
        P: PredictionClient + Sync + 'static,
        F: Future<Output = ()> + Send,
    {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        // Dispatcher: time-series sink + prediction worker pool
        let sink = Arc::new(
            create_time_series_sink(&blueprint.time_series)
                .context("Failed to create time-series sink")?,
        );
        let pool = Arc::new(WorkerPool::start(prediction, &blueprint.worker_pool));
        let fanout = FanoutDispatcher::new(
            Arc::clone(&sink),
            Arc::clone(&pool),
            blueprint.routing.model_sensor_types.iter().copied(),
        )
        .with_point_timestamp(blueprint.time_series.timestamp);
        info!(
            sink = sink.name(),
            model_types = ?blueprint.routing.model_sensor_types,
            timestamp = ?blueprint.time_series.timestamp,
            "Dispatcher ready"
        );

        // Ingestion pipeline is the message handler
        let ingestion = Arc::new(IngestionPipeline::new(
            ingestion::PipelineConfig::from_blueprint(blueprint),
            fanout,
        ));

        // Supervisor: connect, subscribe, start loops
        let supervisor = Arc::new(ConnectionSupervisor::new(
            transport,
            SupervisorSettings::from_liveness(&blueprint.liveness),
        ));
        if let Err(e) = supervisor.start(&blueprint.broker.topics).await {
            pool.shutdown(blueprint.worker_pool.shutdown_timeout()).await;
            return Err(CliError::broker_connection(&blueprint.broker.url, e.to_string()).into());
        }
        let handle = supervisor
            .run(Arc::clone(&ingestion))
            .context("Failed to start supervisor loops")?;

        info!(topics = ?blueprint.broker.topics, "Pipeline running");

        match self.config.timeout {
            Some(timeout) => {
                tokio::select! {
                    _ = shutdown => {},
                    _ = tokio::time::sleep(timeout) => {
                        info!(timeout_secs = timeout.as_secs(), "Pipeline timeout reached");
                    }
                }
            }
            None => shutdown.await,
        }

        // Shutdown: stop intake, drain predictions, close sink, then leave the broker
        info!("Shutting down pipeline...");
        if handle.is_finished() {
            warn!("Supervisor loops exited before shutdown was requested");
        }
        handle.shutdown().await;

        let report = pool.shutdown(blueprint.worker_pool.shutdown_timeout()).await;
        debug!(report = ?report, "Worker pool stopped");

        if let Err(e) = sink.flush().await {
            warn!(error = %e, "Error flushing time-series sink");
        }
        if let Err(e) = sink.close().await {
            warn!(error = %e, "Error closing time-series sink");
        }

        if let Err(e) = supervisor.stop().await {
            warn!(error = %e, "Error while leaving broker");
        }

        let stats = PipelineStats {
            duration: start_time.elapsed(),
            ingestion: ingestion.metrics().snapshot(),
            sink: ingestion.dispatcher().sink_metrics(),
            pool: pool.snapshot(),
            pool_report: report,
        };
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            throughput = format!("{:.2}", stats.throughput()),
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }
}

/// Inject sample readings into the mock broker until the event stream closes
fn spawn_sample_feeder(transport: Arc<MockTransport>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut n: u64 = 0;
        loop {
            ticker.tick().await;
            let (topic, payload) = sample_message(n);
            if transport.inject_message(&topic, payload).await.is_err() {
                debug!("Mock event stream closed, feeder stopping");
                break;
            }
            n += 1;
        }
    })
}

/// Deterministic sample message `n`, cycling through all sensor types
///
/// Humidity uses the object form of `value`.
fn sample_message(n: u64) -> (String, String) {
    let sensor_type = SensorType::ALL[(n as usize) % SensorType::ALL.len()];
    let room = ["roomA", "roomB"][(n as usize / SensorType::ALL.len()) % 2];
    let value = match sensor_type {
        SensorType::Temperature => 20.0 + (n % 10) as f64 * 0.5,
        SensorType::Humidity => 40.0 + (n % 7) as f64,
        SensorType::Co2 => 450.0 + (n % 20) as f64 * 10.0,
        SensorType::Battery => 100.0 - (n % 50) as f64,
        SensorType::Illumination => 300.0 + (n % 5) as f64 * 25.0,
    };
    let time = chrono::Utc::now().timestamp_millis();

    let topic = format!("site/demo/{room}/e/{}", sensor_type.as_str());
    let payload = if sensor_type == SensorType::Humidity {
        format!(r#"{{"time":{time},"value":{{"humidity":{value}}}}}"#)
    } else {
        format!(r#"{{"time":{time},"value":{value}}}"#)
    };
    (topic, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_messages_cycle_types() {
        let topics: Vec<String> = (0..SensorType::ALL.len() as u64)
            .map(|n| sample_message(n).0)
            .collect();
        for sensor_type in SensorType::ALL {
            assert!(topics
                .iter()
                .any(|t| t.ends_with(&format!("/{}", sensor_type.as_str()))));
        }
    }

    #[test]
    fn test_sample_humidity_object_form() {
        let n = SensorType::ALL
            .iter()
            .position(|t| *t == SensorType::Humidity)
            .unwrap() as u64;
        let (_, payload) = sample_message(n);
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert!(json["value"]["humidity"].is_number());
    }

    #[tokio::test]
    async fn test_mock_run_processes_samples() {
        let mut blueprint = PipelineBlueprint::default();
        blueprint.time_series.kind = contracts::TimeSeriesKind::Log;
        blueprint.broker.topics = vec!["site/#".into()];

        let pipeline = Pipeline::new(PipelineConfig {
            blueprint,
            mock: true,
            mock_interval: Duration::from_millis(5),
            timeout: Some(Duration::from_millis(200)),
            metrics_port: None,
        });

        let stats = pipeline.run(std::future::pending()).await.unwrap();
        assert!(stats.ingestion.messages_received > 0);
        assert_eq!(stats.ingestion.rejected(), 0);
        assert_eq!(stats.sink.write_count, stats.ingestion.readings_dispatched);
        assert_eq!(stats.pool_report, dispatcher::ShutdownReport::Drained);
    }
}
