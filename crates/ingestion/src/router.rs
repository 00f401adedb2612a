//! Topic Router
//!
//! 从 topic 中提取 location (倒数第三级) 与 sensorType (最后一级)。

use std::str::FromStr;

use contracts::{SensorType, UnknownSensorPolicy};

use crate::error::{IngestionError, Result};

/// 保留的非遥测类型，总是跳过
pub const RESERVED_LORA: &str = "lora";

const MIN_SEGMENTS: usize = 3;

/// 路由结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// 遥测读数，继续解码
    Telemetry {
        location: String,
        sensor_type: SensorType,
    },
    /// 非遥测消息，直接丢弃
    Skip {
        /// topic 最后一级原文
        sensor_type: String,
    },
}

/// Topic Router
///
/// 同一实例对未知类型始终采用同一策略。
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicRouter {
    policy: UnknownSensorPolicy,
}

impl TopicRouter {
    pub fn new(policy: UnknownSensorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> UnknownSensorPolicy {
        self.policy
    }

    /// 解析 topic
    pub fn route(&self, topic: &str) -> Result<Route> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() < MIN_SEGMENTS {
            return Err(IngestionError::invalid_topic(
                topic,
                format!(
                    "expected at least {MIN_SEGMENTS} segments, got {}",
                    segments.len()
                ),
            ));
        }

        let location = segments[segments.len() - 3];
        let raw_type = segments[segments.len() - 1];
        if location.is_empty() {
            return Err(IngestionError::invalid_topic(topic, "empty location segment"));
        }
        if raw_type.is_empty() {
            return Err(IngestionError::invalid_topic(topic, "empty sensor type segment"));
        }

        if raw_type.eq_ignore_ascii_case(RESERVED_LORA) {
            return Ok(Route::Skip {
                sensor_type: raw_type.to_string(),
            });
        }

        match SensorType::from_str(raw_type) {
            Ok(sensor_type) => Ok(Route::Telemetry {
                location: location.to_string(),
                sensor_type,
            }),
            Err(_) => match self.policy {
                UnknownSensorPolicy::Skip => Ok(Route::Skip {
                    sensor_type: raw_type.to_string(),
                }),
                UnknownSensorPolicy::Reject => Err(IngestionError::UnsupportedSensorType {
                    sensor_type: raw_type.to_string(),
                }),
            },
        }
    }
}
