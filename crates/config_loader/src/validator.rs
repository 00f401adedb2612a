//! 配置校验模块
//!
//! 校验规则：
//! - broker 地址可解析，至少一个 topic，topic 通配符合法
//! - 时间参数 > 0
//! - 工作池 core_size >= 1, max_size >= core_size, queue_capacity >= 1
//! - influx 输出需要 org / bucket
//! - 预测服务地址为 http(s)

use contracts::{ContractError, PipelineBlueprint, TimeSeriesKind};

/// 校验 PipelineBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_service(blueprint)?;
    validate_broker(blueprint)?;
    validate_topics(blueprint)?;
    validate_liveness(blueprint)?;
    validate_worker_pool(blueprint)?;
    validate_time_series(blueprint)?;
    validate_prediction(blueprint)?;
    Ok(())
}

fn validate_service(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.service.name.trim().is_empty() {
        return Err(ContractError::config_validation(
            "service.name",
            "service name cannot be empty",
        ));
    }
    Ok(())
}

/// 校验 broker 连接参数
fn validate_broker(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let broker = &blueprint.broker;
    broker.address()?;

    if broker.client_id_prefix.trim().is_empty() {
        return Err(ContractError::config_validation(
            "broker.client_id_prefix",
            "client id prefix cannot be empty",
        ));
    }
    if broker.keep_alive_secs == 0 {
        return Err(ContractError::config_validation(
            "broker.keep_alive_secs",
            "keep_alive_secs must be > 0",
        ));
    }
    if broker.connect_timeout_secs == 0 {
        return Err(ContractError::config_validation(
            "broker.connect_timeout_secs",
            "connect_timeout_secs must be > 0",
        ));
    }
    if broker.event_capacity == 0 {
        return Err(ContractError::config_validation(
            "broker.event_capacity",
            "event_capacity must be > 0",
        ));
    }
    Ok(())
}

/// 校验订阅 topic
///
/// `#` 只能作为最后一级，`+` / `#` 必须独占一级。
fn validate_topics(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let topics = &blueprint.broker.topics;
    if topics.is_empty() {
        return Err(ContractError::config_validation(
            "broker.topics",
            "at least one topic is required",
        ));
    }

    for (idx, topic) in topics.iter().enumerate() {
        let levels: Vec<&str> = topic.split('/').collect();
        for (level_idx, level) in levels.iter().enumerate() {
            let is_last = level_idx == levels.len() - 1;
            let bad_multi = level.contains('#') && (*level != "#" || !is_last);
            let bad_single = level.contains('+') && *level != "+";
            if bad_multi || bad_single {
                return Err(ContractError::config_validation(
                    format!("broker.topics[{}]", idx),
                    format!("invalid wildcard usage in topic '{}'", topic),
                ));
            }
        }
    }
    Ok(())
}

fn validate_liveness(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let liveness = &blueprint.liveness;
    if liveness.check_interval_secs == 0 {
        return Err(ContractError::config_validation(
            "liveness.check_interval_secs",
            "check_interval_secs must be > 0",
        ));
    }
    if liveness.staleness_threshold_secs == 0 {
        return Err(ContractError::config_validation(
            "liveness.staleness_threshold_secs",
            "staleness_threshold_secs must be > 0",
        ));
    }
    Ok(())
}

/// 校验工作池尺寸
fn validate_worker_pool(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let pool = &blueprint.worker_pool;
    if pool.core_size == 0 {
        return Err(ContractError::config_validation(
            "worker_pool.core_size",
            "core_size must be >= 1",
        ));
    }
    if pool.max_size < pool.core_size {
        return Err(ContractError::config_validation(
            "worker_pool.core_size / worker_pool.max_size",
            format!(
                "max_size ({}) must be >= core_size ({})",
                pool.max_size, pool.core_size
            ),
        ));
    }
    if pool.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "worker_pool.queue_capacity",
            "queue_capacity must be >= 1",
        ));
    }
    Ok(())
}

fn validate_time_series(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let ts = &blueprint.time_series;
    if ts.kind != TimeSeriesKind::Influx {
        return Ok(());
    }

    validate_http_url("time_series.url", &ts.url)?;
    if ts.org.trim().is_empty() {
        return Err(ContractError::config_validation(
            "time_series.org",
            "org is required for influx output",
        ));
    }
    if ts.bucket.trim().is_empty() {
        return Err(ContractError::config_validation(
            "time_series.bucket",
            "bucket is required for influx output",
        ));
    }
    Ok(())
}

fn validate_prediction(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let prediction = &blueprint.prediction;
    validate_http_url("prediction.url", &prediction.url)?;
    if prediction.timeout_ms == 0 {
        return Err(ContractError::config_validation(
            "prediction.timeout_ms",
            "timeout_ms must be > 0",
        ));
    }
    Ok(())
}

fn validate_http_url(field: &str, url: &str) -> Result<(), ContractError> {
    let has_scheme = url.starts_with("http://") || url.starts_with("https://");
    let host = url.split_once("://").map(|(_, rest)| rest).unwrap_or("");
    if !has_scheme || host.is_empty() {
        return Err(ContractError::config_validation(
            field,
            format!("expected an http(s) url, got '{}'", url),
        ));
    }
    Ok(())
}
