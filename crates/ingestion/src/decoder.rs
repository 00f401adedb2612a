//! Payload Decoder
//!
//! 负载格式: `{"time": <epoch ms>, "value": <number> | {"<sensorType>": <number>, ...}}`

use contracts::SensorType;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{IngestionError, Result};

/// 解码结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedValue {
    pub value: f64,
    pub observed_at_epoch_millis: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    time: i64,
    value: Value,
}

/// 解码负载
///
/// 纯函数：相同输入得到相同输出。
pub fn decode(payload: &[u8], sensor_type: SensorType) -> Result<DecodedValue> {
    let envelope: Envelope = serde_json::from_slice(payload)
        .map_err(|e| IngestionError::invalid_payload(format!("JSON parse failed: {e}")))?;

    let value = match &envelope.value {
        Value::Number(n) => n.as_f64(),
        Value::Object(fields) => match fields.get(sensor_type.as_str()) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(other) => {
                return Err(IngestionError::invalid_payload(format!(
                    "field '{}' is not numeric: {}",
                    sensor_type, other
                )))
            }
            None => {
                return Err(IngestionError::invalid_payload(format!(
                    "value object has no '{}' field",
                    sensor_type
                )))
            }
        },
        other => {
            return Err(IngestionError::invalid_payload(format!(
                "unsupported value shape: {}",
                json_kind(other)
            )))
        }
    };

    let value = value.ok_or_else(|| IngestionError::invalid_payload("value out of f64 range"))?;
    Ok(DecodedValue {
        value,
        observed_at_epoch_millis: envelope.time,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_000_000;

    #[test]
    fn test_bare_number() {
        let decoded = decode(br#"{"time":1700000000000,"value":23.5}"#, SensorType::Temperature)
            .unwrap();
        assert_eq!(
            decoded,
            DecodedValue {
                value: 23.5,
                observed_at_epoch_millis: T
            }
        );

        let decoded = decode(br#"{"time":1700000000000,"value":-4}"#, SensorType::Temperature)
            .unwrap();
        assert_eq!(decoded.value, -4.0);
    }

    #[test]
    fn test_nested_object() {
        let payload = br#"{"time":1700000000000,"value":{"battery":88,"rssi":-70}}"#;
        let decoded = decode(payload, SensorType::Battery).unwrap();
        assert_eq!(decoded.value, 88.0);
        assert_eq!(decoded.observed_at_epoch_millis, T);
    }

    #[test]
    fn test_nested_key_must_match_type() {
        let payload = br#"{"time":1700000000000,"value":{"humidity":40}}"#;
        let err = decode(payload, SensorType::Temperature).unwrap_err();
        assert!(err.to_string().contains("no 'temperature' field"));
    }

    #[test]
    fn test_unsupported_shapes() {
        for payload in [
            br#"{"time":1700000000000,"value":"bad"}"#.as_slice(),
            br#"{"time":1700000000000,"value":null}"#,
            br#"{"time":1700000000000,"value":[1,2]}"#,
            br#"{"time":1700000000000,"value":true}"#,
            br#"{"time":1700000000000,"value":{"co2":"400"}}"#,
        ] {
            let err = decode(payload, SensorType::Co2).unwrap_err();
            assert!(
                matches!(err, IngestionError::InvalidPayload { .. }),
                "{}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_time_required_and_integral() {
        for payload in [
            br#"{"value":1}"#.as_slice(),
            br#"{"time":"yesterday","value":1}"#,
            br#"{"time":1.5,"value":1}"#,
        ] {
            assert!(decode(payload, SensorType::Humidity).is_err());
        }
    }

    #[test]
    fn test_malformed_json_carries_parser_message() {
        let err = decode(b"{not json", SensorType::Humidity).unwrap_err();
        match err {
            IngestionError::InvalidPayload { message } => {
                assert!(message.starts_with("JSON parse failed:"), "{message}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decoding_is_idempotent() {
        let payload = br#"{"time":1700000000000,"value":{"illumination":312.25}}"#;
        let first = decode(payload, SensorType::Illumination).unwrap();
        let second = decode(payload, SensorType::Illumination).unwrap();
        assert_eq!(first, second);
    }
}
