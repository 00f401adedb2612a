//! 遥测管道指标
//!
//! 基于 `metrics` facade 记录，Prometheus exporter 负责导出。
//! 所有指标以 `telemetry_ingest_` 为前缀。

use metrics::{counter, gauge, histogram};

/// 记录一条入站消息
pub fn record_message_received() {
    counter!("telemetry_ingest_messages_received_total").increment(1);
}

/// 记录消息处理结果
///
/// `outcome` 取值: `dispatched` / `skipped` / `rejected`
pub fn record_message_outcome(outcome: &str, reason: &str) {
    counter!(
        "telemetry_ingest_messages_processed_total",
        "outcome" => outcome.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录单条消息的处理耗时 (路由 + 解码 + 分发)
pub fn record_handle_latency_ms(latency_ms: f64) {
    histogram!("telemetry_ingest_handle_latency_ms").record(latency_ms);
}

/// 记录时序库写入
pub fn record_sink_write(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "telemetry_ingest_sink_writes_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录预测服务调用结果
///
/// `status` 取值: `success` / `rejected` / `failed`
pub fn record_prediction(sensor_type: &str, status: &str, latency_ms: f64) {
    counter!(
        "telemetry_ingest_predictions_total",
        "sensor_type" => sensor_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("telemetry_ingest_prediction_latency_ms").record(latency_ms);
}

/// 记录工作池队列深度
pub fn record_pool_queue_depth(depth: usize) {
    gauge!("telemetry_ingest_pool_queue_depth").set(depth as f64);
}

/// 记录工作池当前 worker 数
pub fn record_pool_workers(workers: usize) {
    gauge!("telemetry_ingest_pool_workers").set(workers as f64);
}

/// 记录一次提交被队列满阻塞
pub fn record_pool_backpressure() {
    counter!("telemetry_ingest_pool_backpressure_total").increment(1);
}

/// 记录存活检查结果
pub fn record_liveness_outcome(outcome: &str) {
    counter!(
        "telemetry_ingest_liveness_checks_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录 broker 连接状态 (1 = 已连接)
pub fn record_connection_state(connected: bool) {
    gauge!("telemetry_ingest_broker_connected").set(if connected { 1.0 } else { 0.0 });
}

/// 记录距上一条消息的间隔
pub fn record_idle_seconds(idle_secs: f64) {
    gauge!("telemetry_ingest_idle_seconds").set(idle_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    // 未安装 recorder 时调用应为 no-op
    #[test]
    fn test_recorders_without_exporter() {
        record_message_received();
        record_message_outcome("skipped", "lora");
        record_handle_latency_ms(1.5);
        record_sink_write("influx", true);
        record_prediction("co2", "rejected", 12.0);
        record_pool_queue_depth(3);
        record_pool_workers(4);
        record_pool_backpressure();
        record_liveness_outcome("probed");
        record_connection_state(false);
        record_idle_seconds(130.0);
    }
}
