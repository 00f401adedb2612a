//! Ingestion 错误类型

use thiserror::Error;

/// Ingestion 错误
///
/// 每条消息至多产生一个错误，不会向传输层传播。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestionError {
    /// topic 结构不符合 `.../{location}/.../{sensorType}`
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// 原始 topic
        topic: String,
        /// 失败原因
        reason: String,
    },

    /// 负载无法解码
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// 错误消息 (含 JSON 解析器信息)
        message: String,
    },

    /// 传感器类型不受支持 (仅在 reject 策略下出现)
    #[error("unsupported sensor type '{sensor_type}'")]
    UnsupportedSensorType {
        /// topic 最后一级
        sensor_type: String,
    },
}

impl IngestionError {
    /// 创建 topic 错误
    pub fn invalid_topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// 创建负载错误
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// 指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTopic { .. } => "invalid_topic",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::UnsupportedSensorType { .. } => "unsupported_sensor_type",
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
