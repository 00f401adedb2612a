//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::PipelineBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    service: String,
    broker: BrokerInfo,
    liveness: LivenessInfo,
    routing: RoutingInfo,
    time_series: TimeSeriesInfo,
    prediction: PredictionInfo,
    worker_pool: WorkerPoolInfo,
}

#[derive(Serialize)]
struct BrokerInfo {
    url: String,
    client_id_prefix: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    topics: Vec<String>,
    topic_count: usize,
    keep_alive_secs: u64,
    clean_session: bool,
}

#[derive(Serialize)]
struct LivenessInfo {
    check_interval_secs: u64,
    staleness_threshold_secs: u64,
    reconnect_pause_secs: u64,
}

#[derive(Serialize)]
struct RoutingInfo {
    unknown_sensor_policy: String,
    model_sensor_types: Vec<String>,
}

#[derive(Serialize)]
struct TimeSeriesInfo {
    kind: String,
    url: String,
    org: String,
    bucket: String,
    token_set: bool,
}

#[derive(Serialize)]
struct PredictionInfo {
    url: String,
    timeout_ms: u64,
}

#[derive(Serialize)]
struct WorkerPoolInfo {
    core_size: usize,
    max_size: usize,
    queue_capacity: usize,
    shutdown_timeout_secs: u64,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) -> ConfigInfo {
    let broker = &blueprint.broker;
    let ts = &blueprint.time_series;

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        service: blueprint.service.name.clone(),
        broker: BrokerInfo {
            url: broker.url.clone(),
            client_id_prefix: broker.client_id_prefix.clone(),
            topics: if args.topics {
                broker.topics.clone()
            } else {
                Vec::new()
            },
            topic_count: broker.topics.len(),
            keep_alive_secs: broker.keep_alive_secs,
            clean_session: broker.clean_session,
        },
        liveness: LivenessInfo {
            check_interval_secs: blueprint.liveness.check_interval_secs,
            staleness_threshold_secs: blueprint.liveness.staleness_threshold_secs,
            reconnect_pause_secs: blueprint.liveness.reconnect_pause_secs,
        },
        routing: RoutingInfo {
            unknown_sensor_policy: format!("{:?}", blueprint.routing.unknown_sensor_policy),
            model_sensor_types: model_types(blueprint),
        },
        time_series: TimeSeriesInfo {
            kind: format!("{:?}", ts.kind),
            url: ts.url.clone(),
            org: ts.org.clone(),
            bucket: ts.bucket.clone(),
            token_set: ts.token.is_some(),
        },
        prediction: PredictionInfo {
            url: blueprint.prediction.url.clone(),
            timeout_ms: blueprint.prediction.timeout_ms,
        },
        worker_pool: WorkerPoolInfo {
            core_size: blueprint.worker_pool.core_size,
            max_size: blueprint.worker_pool.max_size,
            queue_capacity: blueprint.worker_pool.queue_capacity,
            shutdown_timeout_secs: blueprint.worker_pool.shutdown_timeout_secs,
        },
    }
}

fn model_types(blueprint: &PipelineBlueprint) -> Vec<String> {
    blueprint
        .routing
        .model_sensor_types
        .iter()
        .map(|t| t.as_str().to_string())
        .collect()
}

fn print_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Telemetry Ingest Configuration                 ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let broker = &blueprint.broker;
    println!("📡 Broker");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ URL: {}", broker.url);
    println!("   ├─ Client id prefix: {}", broker.client_id_prefix);
    println!("   ├─ Keep-alive: {}s", broker.keep_alive_secs);
    println!("   ├─ Clean session: {}", broker.clean_session);
    if args.topics {
        println!("   └─ Topics ({}):", broker.topics.len());
        for (i, topic) in broker.topics.iter().enumerate() {
            let prefix = if i == broker.topics.len() - 1 { "└─" } else { "├─" };
            println!("      {} {}", prefix, topic);
        }
    } else {
        println!("   └─ {} topics", broker.topics.len());
    }

    let liveness = &blueprint.liveness;
    println!("\n💓 Liveness");
    println!("   ├─ Check interval: {}s", liveness.check_interval_secs);
    println!("   ├─ Staleness threshold: {}s", liveness.staleness_threshold_secs);
    println!("   └─ Reconnect pause: {}s", liveness.reconnect_pause_secs);

    println!("\n🧭 Routing");
    println!(
        "   ├─ Unknown sensor types: {:?}",
        blueprint.routing.unknown_sensor_policy
    );
    println!("   └─ Model types: {}", model_types(blueprint).join(", "));

    let ts = &blueprint.time_series;
    println!("\n📤 Time-series ({:?})", ts.kind);
    println!("   ├─ URL: {}", ts.url);
    println!("   ├─ Org / bucket: {} / {}", ts.org, ts.bucket);
    println!(
        "   └─ Token: {}",
        if ts.token.is_some() { "set" } else { "not set" }
    );

    let pool = &blueprint.worker_pool;
    println!("\n🔮 Prediction");
    println!("   ├─ URL: {}", blueprint.prediction.url);
    println!("   ├─ Timeout: {}ms", blueprint.prediction.timeout_ms);
    println!(
        "   └─ Workers: core={} max={} queue={}",
        pool.core_size, pool.max_size, pool.queue_capacity
    );

    println!();
}
