//! PipelineBlueprint - Config Loader 输出
//!
//! 描述完整的管道配置：Broker 连接、存活检测、路由策略、输出目标、工作池。

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{ContractError, SensorType};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的管道配置蓝图
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 服务标识
    #[serde(default)]
    pub service: ServiceConfig,

    /// MQTT Broker 连接
    #[serde(default)]
    pub broker: BrokerConfig,

    /// 存活检测
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// 路由策略
    #[serde(default)]
    pub routing: RoutingConfig,

    /// 时序库输出
    #[serde(default)]
    pub time_series: TimeSeriesConfig,

    /// 预测服务
    #[serde(default)]
    pub prediction: PredictionConfig,

    /// 异步工作池
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
}

/// 服务标识配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// 服务名 (写入 CorrelationContext.source)
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "data-processor-service".to_string()
}

/// 投递质量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// 遥测订阅固定使用 at-least-once
pub const TELEMETRY_QOS: QualityOfService = QualityOfService::AtLeastOnce;

/// Broker 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker 地址 (e.g., "tcp://localhost:1883")
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// 客户端 ID 前缀，启动时追加随机后缀
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,

    /// 订阅的 topic 列表 (数组或逗号分隔字符串)
    #[serde(
        default = "default_topics",
        deserialize_with = "deserialize_topics"
    )]
    pub topics: Vec<String>,

    /// 保活间隔 (秒)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// 连接超时 (秒)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// clean session：重连后不保留订阅状态，由 Supervisor 显式重订阅
    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// Transport 自身的重连间隔 (毫秒)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Transport 事件通道容量
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_id_prefix: default_client_id_prefix(),
            topics: default_topics(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            clean_session: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// 解析 broker 地址为 (host, port)
    ///
    /// 接受 `tcp://`、`mqtt://` 前缀或裸 `host:port`，端口缺省为 1883。
    pub fn address(&self) -> Result<(String, u16), ContractError> {
        let rest = match self.url.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(ContractError::config_validation(
                    "broker.url",
                    format!("unsupported scheme '{scheme}', expected tcp:// or mqtt://"),
                ))
            }
            None => self.url.as_str(),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    ContractError::config_validation(
                        "broker.url",
                        format!("invalid port '{port}': {e}"),
                    )
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() {
            return Err(ContractError::config_validation(
                "broker.url",
                format!("missing host in '{}'", self.url),
            ));
        }

        Ok((host.to_string(), port))
    }
}

/// MQTT 默认端口
pub const DEFAULT_MQTT_PORT: u16 = 1883;

fn default_broker_url() -> String {
    "tcp://localhost:1883".to_string()
}

fn default_client_id_prefix() -> String {
    "data-processor".to_string()
}

fn default_topics() -> Vec<String> {
    vec!["data/#".to_string()]
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    100
}

fn default_true() -> bool {
    true
}

/// 将逗号分隔的 topic 字符串拆分为列表
pub fn split_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TopicList {
    Csv(String),
    List(Vec<String>),
}

fn deserialize_topics<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match TopicList::deserialize(deserializer)? {
        TopicList::Csv(raw) => split_topics(&raw),
        TopicList::List(list) => list
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// 存活检测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// 检测周期 (秒)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// 无消息判定为 stale 的阈值 (秒)
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,

    /// 强制断开后重连前的暂停 (秒)
    #[serde(default = "default_reconnect_pause_secs")]
    pub reconnect_pause_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            reconnect_pause_secs: default_reconnect_pause_secs(),
        }
    }
}

impl LivenessConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_secs(self.reconnect_pause_secs)
    }
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_staleness_threshold_secs() -> u64 {
    120
}

fn default_reconnect_pause_secs() -> u64 {
    5
}

/// 未知传感器类型的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSensorPolicy {
    /// 静默丢弃 (记录 debug 日志)
    #[default]
    Skip,
    /// 作为 UnsupportedSensorType 错误拒绝
    Reject,
}

/// 路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// 未知类型策略
    #[serde(default)]
    pub unknown_sensor_policy: UnknownSensorPolicy,

    /// 转发到预测服务的传感器类型
    #[serde(default = "default_model_sensor_types")]
    pub model_sensor_types: Vec<SensorType>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            unknown_sensor_policy: UnknownSensorPolicy::default(),
            model_sensor_types: default_model_sensor_types(),
        }
    }
}

fn default_model_sensor_types() -> Vec<SensorType> {
    SensorType::MODEL_DEFAULTS.to_vec()
}

/// 时序库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSeriesKind {
    /// InfluxDB v2 HTTP 写入
    #[default]
    Influx,
    /// 仅记录日志 (调试/演练)
    Log,
}

/// 时序点时间戳来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointTimestamp {
    /// 载荷中的 `time` (发布端时钟)
    #[default]
    Observed,
    /// 本地接收时间
    Received,
}

/// 时序库输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
    /// 输出类型
    #[serde(default)]
    pub kind: TimeSeriesKind,

    /// InfluxDB 地址
    #[serde(default = "default_influx_url")]
    pub url: String,

    /// 组织
    #[serde(default)]
    pub org: String,

    /// Bucket
    #[serde(default)]
    pub bucket: String,

    /// API Token
    #[serde(default)]
    pub token: Option<String>,

    /// 写入超时 (毫秒)
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,

    /// 时间戳来源
    #[serde(default)]
    pub timestamp: PointTimestamp,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            kind: TimeSeriesKind::default(),
            url: default_influx_url(),
            org: String::new(),
            bucket: String::new(),
            token: None,
            timeout_ms: default_http_timeout_ms(),
            timestamp: PointTimestamp::default(),
        }
    }
}

impl TimeSeriesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_http_timeout_ms() -> u64 {
    5000
}

/// 预测服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// 预测接口地址
    #[serde(default = "default_prediction_url")]
    pub url: String,

    /// 请求超时 (毫秒)
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            url: default_prediction_url(),
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl PredictionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_prediction_url() -> String {
    "http://localhost:8000/predict".to_string()
}

/// 工作池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// 常驻 worker 数
    #[serde(default = "default_core_size")]
    pub core_size: usize,

    /// 最大 worker 数 (队列满时扩容上限)
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 关闭时等待在途任务的上限 (秒)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            core_size: default_core_size(),
            max_size: default_max_size(),
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_core_size() -> usize {
    4
}

fn default_max_size() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    100
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_topics() {
        assert_eq!(
            split_topics(" a/+/b , c/# ,,"),
            vec!["a/+/b".to_string(), "c/#".to_string()]
        );
    }

    #[test]
    fn test_topics_accept_csv_string() {
        let broker: BrokerConfig =
            serde_json::from_str(r#"{"topics": "data/#, site/+/temperature"}"#).unwrap();
        assert_eq!(broker.topics, vec!["data/#", "site/+/temperature"]);
        assert!(broker.clean_session);
    }

    #[test]
    fn test_broker_address() {
        let mut broker = BrokerConfig::default();
        assert_eq!(broker.address().unwrap(), ("localhost".to_string(), 1883));

        broker.url = "mqtt://10.0.0.5:8883".into();
        assert_eq!(broker.address().unwrap(), ("10.0.0.5".to_string(), 8883));

        broker.url = "broker.local".into();
        assert_eq!(broker.address().unwrap(), ("broker.local".to_string(), 1883));

        broker.url = "ws://broker.local:80".into();
        assert!(broker.address().is_err());

        broker.url = "tcp://:1883".into();
        assert!(broker.address().is_err());
    }

    #[test]
    fn test_defaults() {
        let bp = PipelineBlueprint::default();
        assert_eq!(bp.liveness.check_interval_secs, 30);
        assert_eq!(bp.liveness.staleness_threshold_secs, 120);
        assert_eq!(bp.routing.unknown_sensor_policy, UnknownSensorPolicy::Skip);
        assert_eq!(bp.routing.model_sensor_types.len(), 3);
        assert_eq!(bp.broker.topics, vec!["data/#"]);
        assert_eq!(bp.time_series.timestamp, PointTimestamp::Observed);
    }

    #[test]
    fn test_point_timestamp_from_config() {
        let ts: TimeSeriesConfig = serde_json::from_str(r#"{"timestamp": "received"}"#).unwrap();
        assert_eq!(ts.timestamp, PointTimestamp::Received);
    }
}
