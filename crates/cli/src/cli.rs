//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::{PointTimestamp, SensorType, UnknownSensorPolicy, UnknownSensorType};
use std::path::PathBuf;

/// Telemetry Ingest - MQTT sensor telemetry ingestion and dispatch
#[derive(Parser, Debug)]
#[command(
    name = "telemetry-ingest",
    author,
    version,
    about = "MQTT sensor telemetry ingestion pipeline",
    long_about = "Subscribes to sensor topics on an MQTT broker, decodes readings,\n\
                  writes them to a time-series store and forwards model-relevant\n\
                  readings to a prediction service."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TELEMETRY_INGEST_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TELEMETRY_INGEST_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingestion pipeline
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); built-in defaults if omitted
    #[arg(short, long, env = "TELEMETRY_INGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override broker URL, e.g. tcp://broker:1883
    #[arg(long, env = "MQTT_BROKER_URL")]
    pub broker_url: Option<String>,

    /// Override client id prefix (a random suffix is appended)
    #[arg(long, env = "MQTT_CLIENT_ID_PREFIX")]
    pub client_id_prefix: Option<String>,

    /// Override subscribed topics (comma-separated)
    #[arg(long, value_delimiter = ',', env = "MQTT_TOPICS")]
    pub topics: Option<Vec<String>>,

    /// Override MQTT keep-alive interval (seconds)
    #[arg(long, env = "MQTT_KEEP_ALIVE_SECS")]
    pub keep_alive_secs: Option<u64>,

    /// Override broker connect timeout (seconds)
    #[arg(long, env = "MQTT_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<u64>,

    /// Override clean-session flag
    #[arg(long, env = "MQTT_CLEAN_SESSION", action = clap::ArgAction::Set)]
    pub clean_session: Option<bool>,

    /// Override liveness check interval (seconds)
    #[arg(long, env = "LIVENESS_CHECK_INTERVAL_SECS")]
    pub check_interval_secs: Option<u64>,

    /// Override silence tolerated before a keep-alive probe (seconds)
    #[arg(long, env = "LIVENESS_STALENESS_THRESHOLD_SECS")]
    pub staleness_threshold_secs: Option<u64>,

    /// Override pause between a forced disconnect and the reconnect (seconds)
    #[arg(long, env = "LIVENESS_RECONNECT_PAUSE_SECS")]
    pub reconnect_pause_secs: Option<u64>,

    /// Override sensor types forwarded to the prediction service (comma-separated)
    #[arg(long, value_delimiter = ',', env = "MODEL_SENSOR_TYPES", value_parser = parse_sensor_type)]
    pub model_sensor_types: Option<Vec<SensorType>>,

    /// Override handling of unrecognized sensor types
    #[arg(long, value_enum, env = "UNKNOWN_SENSOR_POLICY")]
    pub unknown_sensor_policy: Option<UnknownPolicy>,

    /// Override service name used as correlation source
    #[arg(long, env = "TELEMETRY_INGEST_SERVICE_NAME")]
    pub service_name: Option<String>,

    /// Override InfluxDB URL
    #[arg(long, env = "INFLUX_URL")]
    pub influx_url: Option<String>,

    /// Override InfluxDB organisation
    #[arg(long, env = "INFLUX_ORG")]
    pub influx_org: Option<String>,

    /// Override InfluxDB bucket
    #[arg(long, env = "INFLUX_BUCKET")]
    pub influx_bucket: Option<String>,

    /// Override InfluxDB API token
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// Override which time stamps the written points
    #[arg(long, value_enum, env = "POINT_TIMESTAMP")]
    pub point_timestamp: Option<TimestampSource>,

    /// Override prediction service URL
    #[arg(long, env = "PREDICTION_URL")]
    pub prediction_url: Option<String>,

    /// Override prediction request timeout (milliseconds)
    #[arg(long, env = "PREDICTION_TIMEOUT_MS")]
    pub prediction_timeout_ms: Option<u64>,

    /// Override prediction worker pool core size
    #[arg(long, env = "WORKER_POOL_CORE_SIZE")]
    pub core_pool_size: Option<usize>,

    /// Override prediction worker pool max size
    #[arg(long, env = "WORKER_POOL_MAX_SIZE")]
    pub max_pool_size: Option<usize>,

    /// Override prediction queue capacity
    #[arg(long, env = "WORKER_POOL_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Override how long shutdown waits for queued predictions (seconds)
    #[arg(long, env = "WORKER_POOL_SHUTDOWN_TIMEOUT_SECS")]
    pub shutdown_timeout_secs: Option<u64>,

    /// Run against an in-process mock broker fed with sample readings
    #[arg(long)]
    pub mock: bool,

    /// Interval between sample readings in mock mode (milliseconds)
    #[arg(long, default_value = "1000", env = "TELEMETRY_INGEST_MOCK_INTERVAL_MS")]
    pub mock_interval_ms: u64,

    /// Stop after this many seconds (0 = run until signalled)
    #[arg(long, default_value = "0", env = "TELEMETRY_INGEST_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without running pipeline
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "TELEMETRY_INGEST_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// List subscribed topics
    #[arg(long)]
    pub topics: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Unrecognized sensor type handling
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum UnknownPolicy {
    /// Drop silently
    Skip,
    /// Count and log as rejected
    Reject,
}

impl From<UnknownPolicy> for UnknownSensorPolicy {
    fn from(policy: UnknownPolicy) -> Self {
        match policy {
            UnknownPolicy::Skip => Self::Skip,
            UnknownPolicy::Reject => Self::Reject,
        }
    }
}

/// Time-series point timestamp source
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TimestampSource {
    /// Payload `time`
    Observed,
    /// Local receive time
    Received,
}

impl From<TimestampSource> for PointTimestamp {
    fn from(source: TimestampSource) -> Self {
        match source {
            TimestampSource::Observed => Self::Observed,
            TimestampSource::Received => Self::Received,
        }
    }
}

fn parse_sensor_type(s: &str) -> Result<SensorType, UnknownSensorType> {
    s.trim().parse()
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_comma_separated() {
        let cli = Cli::try_parse_from([
            "telemetry-ingest",
            "run",
            "--topics",
            "site/+/+/e/temperature,site/+/+/e/co2",
            "--mock",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(
            args.topics.unwrap(),
            vec!["site/+/+/e/temperature", "site/+/+/e/co2"]
        );
        assert!(args.mock);
    }

    #[test]
    fn test_tuning_flags() {
        let cli = Cli::try_parse_from([
            "telemetry-ingest",
            "run",
            "--core-pool-size",
            "2",
            "--max-pool-size",
            "6",
            "--clean-session",
            "false",
            "--model-sensor-types",
            "co2, humidity",
            "--unknown-sensor-policy",
            "reject",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.core_pool_size, Some(2));
        assert_eq!(args.max_pool_size, Some(6));
        assert_eq!(args.clean_session, Some(false));
        assert_eq!(
            args.model_sensor_types.unwrap(),
            vec![SensorType::Co2, SensorType::Humidity]
        );
        assert!(matches!(args.unknown_sensor_policy, Some(UnknownPolicy::Reject)));
    }

    #[test]
    fn test_unknown_model_type_rejected() {
        let result = Cli::try_parse_from([
            "telemetry-ingest",
            "run",
            "--model-sensor-types",
            "pressure",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["telemetry-ingest", "-q", "-v", "validate"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verbosity_count() {
        let cli = Cli::try_parse_from(["telemetry-ingest", "-vv", "info", "--json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Info(InfoArgs { json: true, .. })));
    }
}
