//! Live Pipeline Demo
//!
//! Connects to a real broker and runs the full pipeline for a fixed time,
//! logging points and sending predictions over HTTP.
//!
//! Run with: cargo run -p demos --bin live_pipeline -- <config.toml> [seconds]

use std::sync::Arc;
use std::time::Duration;

use config_loader::ConfigLoader;
use connection::{generate_client_id, ConnectionSupervisor, RumqttTransport, SupervisorSettings};
use dispatcher::{create_time_series_sink, FanoutDispatcher, HttpPredictionClient, WorkerPool};
use ingestion::{IngestionPipeline, PipelineConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init_with_config(observability::ObservabilityConfig {
        service_name: "live_pipeline".to_string(),
        log_format: observability::LogFormat::Pretty,
        metrics_port: None,
        default_log_level: "info".to_string(),
    })?;

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: live_pipeline <config.toml> [seconds]")?;
    let seconds: u64 = match std::env::args().nth(2) {
        Some(s) => s.parse()?,
        None => 60,
    };
    let blueprint = ConfigLoader::load_from_path(std::path::Path::new(&path))?;

    let sink = Arc::new(create_time_series_sink(&blueprint.time_series)?);
    let client = Arc::new(HttpPredictionClient::new(&blueprint.prediction)?);
    let pool = Arc::new(WorkerPool::start(client, &blueprint.worker_pool));
    let ingestion = Arc::new(IngestionPipeline::new(
        PipelineConfig::from_blueprint(&blueprint),
        FanoutDispatcher::new(
            Arc::clone(&sink),
            Arc::clone(&pool),
            blueprint.routing.model_sensor_types.iter().copied(),
        )
        .with_point_timestamp(blueprint.time_series.timestamp),
    ));

    let client_id = generate_client_id(&blueprint.broker.client_id_prefix);
    let transport = Arc::new(RumqttTransport::new(&blueprint.broker, client_id)?);
    let supervisor = Arc::new(ConnectionSupervisor::new(
        transport,
        SupervisorSettings::from_liveness(&blueprint.liveness),
    ));
    supervisor.start(&blueprint.broker.topics).await?;
    let handle = supervisor.run(Arc::clone(&ingestion))?;

    tracing::info!(seconds, "Pipeline running");
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    handle.shutdown().await;
    pool.shutdown(blueprint.worker_pool.shutdown_timeout()).await;
    supervisor.stop().await?;

    tracing::info!(metrics = ?ingestion.metrics().snapshot(), "Live demo finished");
    Ok(())
}
