//! Mock Pipeline Demo
//!
//! Feeds a handful of sensor messages through the mock broker and prints
//! what reached the time-series sink and the prediction service.
//! No broker, InfluxDB or model service required.
//!
//! Run with: cargo run -p demos --bin mock_pipeline [config.toml]

use std::sync::Arc;
use std::time::Duration;

use config_loader::ConfigLoader;
use connection::{ConnectionSupervisor, MockTransport, SupervisorSettings};
use contracts::PipelineBlueprint;
use dispatcher::{FanoutDispatcher, MemorySink, RecordingPredictionClient, WorkerPool};
use ingestion::{IngestionPipeline, PipelineConfig};

const MESSAGES: [(&str, &str); 6] = [
    ("site/n1/roomA/e/temperature", r#"{"time":1700000000000,"value":23.5}"#),
    ("site/n1/roomA/e/humidity", r#"{"time":1700000000100,"value":{"humidity":41.2}}"#),
    ("site/n1/roomB/e/co2", r#"{"time":1700000000200,"value":612}"#),
    ("site/n1/roomB/e/battery", r#"{"time":1700000000300,"value":{"battery":88}}"#),
    ("site/n1/roomB/e/lora", r#"{"rssi":-97}"#),
    ("site/n1/roomA/e/temperature", r#"{"time":1700000000400,"value":"bad"}"#),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting Mock Pipeline Demo");

    // ==== Stage 1: Use default config or load from file ====
    let blueprint = if let Some(path) = std::env::args().nth(1) {
        tracing::info!(path = %path, "Loading pipeline config");
        ConfigLoader::load_from_path(std::path::Path::new(&path))?
    } else {
        let mut blueprint = PipelineBlueprint::default();
        blueprint.broker.topics = vec!["site/+/+/e/+".to_string()];
        blueprint
    };

    // ==== Stage 2: Dispatcher (memory sink + recording prediction client) ====
    let sink = MemorySink::new();
    let client = Arc::new(RecordingPredictionClient::new());
    let pool = Arc::new(WorkerPool::start(Arc::clone(&client), &blueprint.worker_pool));
    let fanout = FanoutDispatcher::new(
        Arc::new(sink.clone()),
        Arc::clone(&pool),
        blueprint.routing.model_sensor_types.iter().copied(),
    );

    // ==== Stage 3: Ingestion pipeline + supervisor over the mock broker ====
    let ingestion = Arc::new(IngestionPipeline::new(
        PipelineConfig::from_blueprint(&blueprint),
        fanout,
    ));
    let transport = Arc::new(MockTransport::new());
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::clone(&transport),
        SupervisorSettings::from_liveness(&blueprint.liveness),
    ));
    supervisor.start(&blueprint.broker.topics).await?;
    let handle = supervisor.run(Arc::clone(&ingestion))?;

    // ==== Stage 4: Publish ====
    for (topic, payload) in MESSAGES {
        transport.inject_message(topic, payload).await?;
    }
    while ingestion.metrics().snapshot().messages_received < MESSAGES.len() as u64 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // ==== Stage 5: Shutdown ====
    tracing::info!("Shutting down...");
    handle.shutdown().await;
    let report = pool.shutdown(blueprint.worker_pool.shutdown_timeout()).await;
    supervisor.stop().await?;

    let metrics = ingestion.metrics().snapshot();
    tracing::info!(
        received = metrics.messages_received,
        dispatched = metrics.readings_dispatched,
        skipped = metrics.messages_skipped,
        rejected = metrics.rejected(),
        pool = ?report,
        "Demo finished"
    );

    println!("\nTime-series points:");
    for point in sink.points() {
        println!("  {}", point.to_line_protocol());
    }
    println!("\nPrediction requests:");
    for call in client.calls() {
        println!(
            "  {} {} = {} (trace {})",
            call.request.location,
            call.request.sensor_type.as_str(),
            call.request.value,
            call.trace_id
        );
    }

    Ok(())
}
