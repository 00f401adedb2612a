//! `run` command implementation.

use anyhow::{Context, Result};
use config_loader::ConfigFormat;
use contracts::{PipelineBlueprint, TimeSeriesKind};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let blueprint = load_blueprint(args)?;

    info!(
        service = %blueprint.service.name,
        broker = %blueprint.broker.url,
        topics = blueprint.broker.topics.len(),
        time_series = ?blueprint.time_series.kind,
        prediction = %blueprint.prediction.url,
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        let effective = config_loader::ConfigLoader::render(&blueprint, ConfigFormat::Toml)
            .context("Failed to render effective configuration")?;
        println!("=== Effective configuration ===\n\n{effective}");
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        blueprint,
        mock: args.mock,
        mock_interval: Duration::from_millis(args.mock_interval_ms.max(1)),
        timeout: if args.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(args.timeout))
        },
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
    };

    let stats = Pipeline::new(pipeline_config)
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        received = stats.ingestion.messages_received,
        dispatched = stats.ingestion.readings_dispatched,
        rejected = stats.ingestion.rejected(),
        duration_secs = stats.duration.as_secs_f64(),
        "Pipeline stopped"
    );
    stats.print_summary();

    Ok(())
}

/// Load the blueprint, apply flag / env overrides, then validate
///
/// Mock runs always log points instead of writing to InfluxDB.
pub fn load_blueprint(args: &RunArgs) -> Result<PipelineBlueprint> {
    let mut blueprint = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            config_loader::ConfigLoader::parse_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            PipelineBlueprint::default()
        }
    };

    apply_overrides(&mut blueprint, args);
    config_loader::validate(&blueprint).context("Configuration validation failed")?;
    Ok(blueprint)
}

fn apply_overrides(blueprint: &mut PipelineBlueprint, args: &RunArgs) {
    if let Some(url) = &args.broker_url {
        info!(broker = %url, "Overriding broker URL from CLI");
        blueprint.broker.url = url.clone();
    }
    if let Some(prefix) = &args.client_id_prefix {
        blueprint.broker.client_id_prefix = prefix.clone();
    }
    if let Some(topics) = &args.topics {
        let topics: Vec<String> = topics
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        info!(topics = ?topics, "Overriding topics from CLI");
        blueprint.broker.topics = topics;
    }
    if let Some(secs) = args.keep_alive_secs {
        blueprint.broker.keep_alive_secs = secs;
    }
    if let Some(secs) = args.connect_timeout_secs {
        blueprint.broker.connect_timeout_secs = secs;
    }
    if let Some(clean) = args.clean_session {
        blueprint.broker.clean_session = clean;
    }
    if let Some(secs) = args.check_interval_secs {
        blueprint.liveness.check_interval_secs = secs;
    }
    if let Some(secs) = args.staleness_threshold_secs {
        blueprint.liveness.staleness_threshold_secs = secs;
    }
    if let Some(secs) = args.reconnect_pause_secs {
        blueprint.liveness.reconnect_pause_secs = secs;
    }
    if let Some(types) = &args.model_sensor_types {
        info!(model_types = ?types, "Overriding model sensor types from CLI");
        blueprint.routing.model_sensor_types = types.clone();
    }
    if let Some(policy) = args.unknown_sensor_policy {
        blueprint.routing.unknown_sensor_policy = policy.into();
    }
    if let Some(name) = &args.service_name {
        blueprint.service.name = name.clone();
    }
    if let Some(url) = &args.influx_url {
        blueprint.time_series.url = url.clone();
    }
    if let Some(org) = &args.influx_org {
        blueprint.time_series.org = org.clone();
    }
    if let Some(bucket) = &args.influx_bucket {
        blueprint.time_series.bucket = bucket.clone();
    }
    if let Some(token) = &args.influx_token {
        blueprint.time_series.token = Some(token.clone());
    }
    if let Some(source) = args.point_timestamp {
        blueprint.time_series.timestamp = source.into();
    }
    if let Some(url) = &args.prediction_url {
        blueprint.prediction.url = url.clone();
    }
    if let Some(ms) = args.prediction_timeout_ms {
        blueprint.prediction.timeout_ms = ms;
    }
    if let Some(size) = args.core_pool_size {
        blueprint.worker_pool.core_size = size;
    }
    if let Some(size) = args.max_pool_size {
        blueprint.worker_pool.max_size = size;
    }
    if let Some(capacity) = args.queue_capacity {
        blueprint.worker_pool.queue_capacity = capacity;
    }
    if let Some(secs) = args.shutdown_timeout_secs {
        blueprint.worker_pool.shutdown_timeout_secs = secs;
    }
    if args.mock && blueprint.time_series.kind != TimeSeriesKind::Log {
        warn!("Mock mode - time-series points are logged instead of written");
        blueprint.time_series.kind = TimeSeriesKind::Log;
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &PipelineBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Service: {}", blueprint.service.name);
    println!("\nBroker:");
    println!("  URL: {}", blueprint.broker.url);
    println!("  Client id prefix: {}", blueprint.broker.client_id_prefix);
    println!("  Clean session: {}", blueprint.broker.clean_session);
    println!("\nTopics ({}):", blueprint.broker.topics.len());
    for topic in &blueprint.broker.topics {
        println!("  - {}", topic);
    }
    println!(
        "Liveness: check every {}s, probe after {}s idle",
        blueprint.liveness.check_interval_secs, blueprint.liveness.staleness_threshold_secs
    );
    println!(
        "\nTime-series: {:?} ({}), timestamp {:?}",
        blueprint.time_series.kind, blueprint.time_series.url, blueprint.time_series.timestamp
    );
    println!("Prediction: {}", blueprint.prediction.url);
    println!(
        "Worker pool: core={} max={} queue={}",
        blueprint.worker_pool.core_size,
        blueprint.worker_pool.max_size,
        blueprint.worker_pool.queue_capacity
    );
    println!();
}
