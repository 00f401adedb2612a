//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, TimeSeriesKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    service: String,
    broker: String,
    topic_count: usize,
    time_series: String,
    model_sensor_types: Vec<String>,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    service: blueprint.service.name.clone(),
                    broker: blueprint.broker.url.clone(),
                    topic_count: blueprint.broker.topics.len(),
                    time_series: format!("{:?}", blueprint.time_series.kind),
                    model_sensor_types: blueprint
                        .routing
                        .model_sensor_types
                        .iter()
                        .map(|t| t.as_str().to_string())
                        .collect(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.routing.model_sensor_types.is_empty() {
        warnings.push(
            "routing.model_sensor_types is empty - no reading reaches the prediction service"
                .to_string(),
        );
    }

    if blueprint.time_series.kind == TimeSeriesKind::Influx && blueprint.time_series.token.is_none()
    {
        warnings.push("time_series.token not set - writes are unauthenticated".to_string());
    }

    if blueprint.time_series.kind == TimeSeriesKind::Log {
        warnings.push("time_series.kind = log - points are logged, not stored".to_string());
    }

    let liveness = &blueprint.liveness;
    if liveness.staleness_threshold_secs < liveness.check_interval_secs {
        warnings.push(format!(
            "liveness.staleness_threshold_secs ({}) is below check_interval_secs ({}) - every idle check will probe",
            liveness.staleness_threshold_secs, liveness.check_interval_secs
        ));
    }

    for topic in &blueprint.broker.topics {
        if !topic.contains('#') && topic.split('/').count() < 3 {
            warnings.push(format!(
                "topic '{}' has fewer than 3 levels - its messages cannot be routed",
                topic
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Service: {}", summary.service);
            println!("  Broker: {}", summary.broker);
            println!("  Topics: {}", summary.topic_count);
            println!("  Time-series: {}", summary.time_series);
            println!("  Model types: {}", summary.model_sensor_types.join(", "));
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
