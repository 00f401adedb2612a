//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置 → 管道装配测试
//! - 模拟 e2e 测试（mock broker → 路由/解码 → 时序写入 + 预测池）
//! - 连接监督与重连场景

#[cfg(test)]
mod harness {
    use std::sync::Arc;
    use std::time::Duration;

    use connection::{ConnectionSupervisor, MockTransport, SupervisorHandle, SupervisorSettings};
    use contracts::PipelineBlueprint;
    use dispatcher::{
        FanoutDispatcher, MemorySink, RecordingPredictionClient, ShutdownReport, WorkerPool,
    };
    use ingestion::{IngestionPipeline, PipelineConfig};

    pub type Dispatcher = FanoutDispatcher<MemorySink, RecordingPredictionClient>;

    /// Mock broker → supervisor → ingestion → fan-out, wired like the CLI does
    pub struct Harness {
        pub transport: Arc<MockTransport>,
        pub supervisor: Arc<ConnectionSupervisor<MockTransport>>,
        pub ingestion: Arc<IngestionPipeline<Dispatcher>>,
        pub sink: MemorySink,
        pub client: Arc<RecordingPredictionClient>,
        pub pool: Arc<WorkerPool<RecordingPredictionClient>>,
        handle: Option<SupervisorHandle>,
    }

    impl Harness {
        pub async fn start(blueprint: &PipelineBlueprint) -> Self {
            Self::start_with_client(blueprint, RecordingPredictionClient::new()).await
        }

        pub async fn start_with_client(
            blueprint: &PipelineBlueprint,
            client: RecordingPredictionClient,
        ) -> Self {
            let transport = Arc::new(MockTransport::new());
            let sink = MemorySink::new();
            let client = Arc::new(client);
            let pool = Arc::new(WorkerPool::start(Arc::clone(&client), &blueprint.worker_pool));
            let fanout = FanoutDispatcher::new(
                Arc::new(sink.clone()),
                Arc::clone(&pool),
                blueprint.routing.model_sensor_types.iter().copied(),
            );
            let ingestion = Arc::new(IngestionPipeline::new(
                PipelineConfig::from_blueprint(blueprint),
                fanout,
            ));
            let supervisor = Arc::new(ConnectionSupervisor::new(
                Arc::clone(&transport),
                SupervisorSettings::from_liveness(&blueprint.liveness),
            ));

            supervisor.start(&blueprint.broker.topics).await.unwrap();
            let handle = supervisor.run(Arc::clone(&ingestion)).unwrap();

            Self {
                transport,
                supervisor,
                ingestion,
                sink,
                client,
                pool,
                handle: Some(handle),
            }
        }

        pub async fn publish(&self, topic: &str, payload: &str) {
            self.transport
                .inject_message(topic, payload.to_string())
                .await
                .unwrap();
        }

        /// Wait until `count` messages went through the pipeline
        pub async fn wait_for_messages(&self, count: u64) {
            let ingestion = Arc::clone(&self.ingestion);
            wait_until(move || ingestion.metrics().snapshot().messages_received >= count).await;
        }

        /// Stop intake, drain the pool, then leave the broker
        pub async fn finish(mut self) -> ShutdownReport {
            if let Some(handle) = self.handle.take() {
                handle.shutdown().await;
            }
            let report = self.pool.shutdown(Duration::from_secs(5)).await;
            self.supervisor.stop().await.unwrap();
            report
        }
    }

    pub async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn test_blueprint() -> PipelineBlueprint {
        let mut blueprint = PipelineBlueprint::default();
        blueprint.broker.topics = vec!["site/+/+/e/+".into()];
        blueprint
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{MessageHandler, RawMessage, SensorType, SENSOR_MEASUREMENT};
    use dispatcher::{RecordingPredictionClient, ShutdownReport};
    use tokio::task::JoinSet;

    use crate::harness::{test_blueprint, Harness};

    /// Temperature reading → one point and one prediction
    #[tokio::test]
    async fn test_e2e_temperature_reading() {
        let harness = Harness::start(&test_blueprint()).await;

        harness
            .publish(
                "site/n/roomA/e/temperature",
                r#"{"time":1700000000000,"value":23.5}"#,
            )
            .await;
        harness.wait_for_messages(1).await;

        let sink = harness.sink.clone();
        let client = harness.client.clone();
        assert_eq!(harness.finish().await, ShutdownReport::Drained);

        let points = sink.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, SENSOR_MEASUREMENT);
        assert_eq!(points[0].tags["location"], "roomA");
        assert_eq!(points[0].tags["type"], "temperature");
        assert_eq!(points[0].value, 23.5);
        assert_eq!(points[0].timestamp_millis, 1_700_000_000_000);

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request.location, "roomA");
        assert_eq!(calls[0].request.sensor_type, SensorType::Temperature);
        assert_eq!(calls[0].request.value, 23.5);
    }

    /// Battery with object value → point only
    #[tokio::test]
    async fn test_e2e_battery_object_value() {
        let harness = Harness::start(&test_blueprint()).await;

        harness
            .publish(
                "site/n/roomA/e/battery",
                r#"{"time":1700000000000,"value":{"battery":88}}"#,
            )
            .await;
        harness.wait_for_messages(1).await;

        let sink = harness.sink.clone();
        let client = harness.client.clone();
        harness.finish().await;

        let points = sink.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 88.0);
        assert_eq!(client.call_count(), 0);
    }

    /// LoRa status topic → dropped before decode
    #[tokio::test]
    async fn test_e2e_lora_skipped() {
        let harness = Harness::start(&test_blueprint()).await;

        harness
            .publish("site/n/roomA/e/lora", "not even json")
            .await;
        harness.wait_for_messages(1).await;

        let ingestion = harness.ingestion.clone();
        let sink = harness.sink.clone();
        let client = harness.client.clone();
        harness.finish().await;
        let metrics = ingestion.metrics().snapshot();

        assert_eq!(metrics.messages_skipped, 1);
        assert_eq!(metrics.rejected(), 0);
        assert!(sink.is_empty());
        assert_eq!(client.call_count(), 0);
    }

    /// Non-numeric value → InvalidPayload, nothing written
    #[tokio::test]
    async fn test_e2e_invalid_payload() {
        let harness = Harness::start(&test_blueprint()).await;

        harness
            .publish(
                "site/n/roomA/e/temperature",
                r#"{"time":1700000000000,"value":"bad"}"#,
            )
            .await;
        harness.publish("short/topic", "{}").await;
        harness.wait_for_messages(2).await;

        let ingestion = harness.ingestion.clone();
        let sink = harness.sink.clone();
        let client = harness.client.clone();
        harness.finish().await;
        let metrics = ingestion.metrics().snapshot();

        assert_eq!(metrics.invalid_payloads, 1);
        assert_eq!(metrics.invalid_topics, 1);
        assert_eq!(metrics.readings_dispatched, 0);
        assert!(sink.is_empty());
        assert_eq!(client.call_count(), 0);
    }

    /// Mixed stream: every valid reading written, only model types predicted
    #[tokio::test]
    async fn test_e2e_mixed_stream() {
        let harness = Harness::start(&test_blueprint()).await;

        let messages = [
            ("site/n/roomA/e/temperature", r#"{"time":1,"value":21.0}"#),
            ("site/n/roomA/e/humidity", r#"{"time":2,"value":{"humidity":40}}"#),
            ("site/n/roomB/e/co2", r#"{"time":3,"value":612}"#),
            ("site/n/roomB/e/illumination", r#"{"time":4,"value":320}"#),
            ("site/n/roomB/e/battery", r#"{"time":5,"value":77}"#),
            ("site/n/roomB/e/pressure", r#"{"time":6,"value":1013}"#),
        ];
        for (topic, payload) in messages {
            harness.publish(topic, payload).await;
        }
        harness.wait_for_messages(messages.len() as u64).await;

        let ingestion = harness.ingestion.clone();
        let sink = harness.sink.clone();
        let client = harness.client.clone();
        harness.finish().await;
        let metrics = ingestion.metrics().snapshot();

        assert_eq!(metrics.readings_dispatched, 5);
        assert_eq!(metrics.messages_skipped, 1);
        assert_eq!(sink.len(), 5);

        let predicted: HashSet<SensorType> = client
            .calls()
            .iter()
            .map(|c| c.request.sensor_type)
            .collect();
        assert_eq!(
            predicted,
            HashSet::from([SensorType::Temperature, SensorType::Humidity, SensorType::Co2])
        );
    }

    /// Every message gets its own correlation ids
    #[tokio::test]
    async fn test_e2e_correlation_ids_unique() {
        let harness = Harness::start(&test_blueprint()).await;

        for i in 0..10 {
            harness
                .publish(
                    "site/n/roomA/e/co2",
                    &format!(r#"{{"time":{i},"value":{}}}"#, 400 + i),
                )
                .await;
        }
        harness.wait_for_messages(10).await;

        let client = harness.client.clone();
        harness.finish().await;

        let calls = client.calls();
        assert_eq!(calls.len(), 10);
        let trace_ids: HashSet<&str> = calls.iter().map(|c| c.trace_id.as_str()).collect();
        let message_ids: HashSet<&str> = calls.iter().map(|c| c.message_id.as_str()).collect();
        assert_eq!(trace_ids.len(), 10);
        assert_eq!(message_ids.len(), 10);
    }

    /// Slow prediction service: bounded pool slows intake but loses nothing
    #[tokio::test]
    async fn test_e2e_backpressure_no_loss() {
        let mut blueprint = test_blueprint();
        blueprint.worker_pool.core_size = 1;
        blueprint.worker_pool.max_size = 2;
        blueprint.worker_pool.queue_capacity = 2;

        let client = RecordingPredictionClient::new();
        client.set_delay(Some(Duration::from_millis(10)));
        let harness = Harness::start_with_client(&blueprint, client).await;

        for i in 0..20 {
            harness
                .publish(
                    "site/n/roomA/e/temperature",
                    &format!(r#"{{"time":{i},"value":{i}}}"#),
                )
                .await;
        }
        harness.wait_for_messages(20).await;

        let pool = harness.pool.clone();
        let client = harness.client.clone();
        assert_eq!(harness.finish().await, ShutdownReport::Drained);

        let snapshot = pool.snapshot();
        assert_eq!(client.call_count(), 20);
        assert_eq!(snapshot.completed, 20);
        assert!(snapshot.blocked > 0);
        assert!(snapshot.workers <= 2);
    }

    /// Handler invoked from many tasks at once, as with per-topic delivery threads
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_concurrent_handlers() {
        let harness = Harness::start(&test_blueprint()).await;
        let kinds = [
            ("temperature", r#"{"time":1700000000000,"value":21.5}"#),
            ("battery", r#"{"time":1700000000000,"value":{"battery":77}}"#),
            ("co2", r#"{"time":1700000000000,"value":640}"#),
            ("lora", r#"{"time":1700000000000,"value":1}"#),
        ];

        let mut tasks = JoinSet::new();
        for room in 0..8 {
            let ingestion = Arc::clone(&harness.ingestion);
            tasks.spawn(async move {
                for i in 0..20 {
                    let (sensor, payload) = kinds[i % kinds.len()];
                    let topic = format!("site/n/room{room}/e/{sensor}");
                    ingestion.handle(RawMessage::new(topic, payload)).await;
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let ingestion = harness.ingestion.clone();
        let sink = harness.sink.clone();
        let client = harness.client.clone();
        assert_eq!(harness.finish().await, ShutdownReport::Drained);

        let metrics = ingestion.metrics().snapshot();
        assert_eq!(metrics.messages_received, 160);
        assert_eq!(metrics.readings_dispatched, 120);
        assert_eq!(metrics.messages_skipped, 40);

        let points = sink.points();
        assert_eq!(points.len(), 120);
        for room in 0..8 {
            let location = format!("room{room}");
            let per_room = points
                .iter()
                .filter(|p| p.tags.get("location") == Some(&location))
                .count();
            assert_eq!(per_room, 15, "{location}");
        }

        let calls = client.calls();
        assert_eq!(calls.len(), 80);
        assert!(calls
            .iter()
            .all(|c| c.request.sensor_type != SensorType::Battery));
        let trace_ids: HashSet<&str> = calls.iter().map(|c| c.trace_id.as_str()).collect();
        let message_ids: HashSet<&str> = calls.iter().map(|c| c.message_id.as_str()).collect();
        assert_eq!(trace_ids.len(), 80);
        assert_eq!(message_ids.len(), 80);
    }

    /// Sink outage does not stop predictions; 4xx answers are not retried
    #[tokio::test]
    async fn test_e2e_sink_failure_and_rejection() {
        let client = RecordingPredictionClient::new();
        client.reject_with(422);
        let harness = Harness::start_with_client(&test_blueprint(), client).await;
        harness.sink.set_failing(true);

        harness
            .publish("site/n/roomA/e/humidity", r#"{"time":1,"value":55}"#)
            .await;
        harness.wait_for_messages(1).await;

        let ingestion = harness.ingestion.clone();
        let pool = harness.pool.clone();
        let client = harness.client.clone();
        harness.finish().await;
        let sink_metrics = ingestion.dispatcher().sink_metrics();

        assert_eq!(sink_metrics.failure_count, 1);
        assert_eq!(client.call_count(), 1);
        assert_eq!(pool.snapshot().rejected, 1);
    }
}

#[cfg(test)]
mod connection_tests {
    use connection::LivenessOutcome;

    use crate::harness::{test_blueprint, Harness};

    fn status_topic() -> &'static str {
        "client/status/mock-client"
    }

    /// Start subscribes every topic and announces presence
    #[tokio::test]
    async fn test_start_subscribes_and_announces() {
        let mut blueprint = test_blueprint();
        blueprint.broker.topics = vec!["a/+/+/e/temperature".into(), "a/+/+/e/co2".into()];
        let harness = Harness::start(&blueprint).await;

        assert_eq!(
            harness.transport.subscribe_calls(),
            vec!["a/+/+/e/co2", "a/+/+/e/temperature"]
        );
        let online = harness.transport.publishes_to(status_topic());
        assert_eq!(online.len(), 1);
        assert!(online[0].retain);
        assert_eq!(&online[0].payload[..], b"online");

        let transport = harness.transport.clone();
        harness.finish().await;

        assert_eq!(
            transport.unsubscribe_calls(),
            vec!["a/+/+/e/co2", "a/+/+/e/temperature"]
        );
        let status = transport.publishes_to(status_topic());
        assert_eq!(&status.last().unwrap().payload[..], b"offline");
        assert_eq!(transport.disconnect_calls(), 1);
    }

    /// Lost link: next liveness check reconnects and resubscribes everything
    #[tokio::test]
    async fn test_reconnect_resubscribes_and_keeps_processing() {
        let harness = Harness::start(&test_blueprint()).await;
        harness.transport.sever_silently();

        let outcome = harness.supervisor.check_liveness().await;
        assert_eq!(outcome, LivenessOutcome::Reconnected);
        assert_eq!(harness.transport.connect_calls(), 2);
        assert_eq!(
            harness.transport.subscribe_calls(),
            vec!["site/+/+/e/+", "site/+/+/e/+"]
        );

        harness
            .publish("site/n/roomA/e/temperature", r#"{"time":1,"value":20}"#)
            .await;
        harness.wait_for_messages(1).await;

        let sink = harness.sink.clone();
        harness.finish().await;
        assert_eq!(sink.len(), 1);
    }

    /// Reconnect failures are retried on the next cycle, never fatal
    #[tokio::test]
    async fn test_reconnect_failure_then_recovery() {
        let harness = Harness::start(&test_blueprint()).await;
        harness.transport.sever_silently();
        harness.transport.fail_next_connects(1);

        assert_eq!(
            harness.supervisor.check_liveness().await,
            LivenessOutcome::ReconnectFailed
        );
        assert_eq!(
            harness.supervisor.check_liveness().await,
            LivenessOutcome::Reconnected
        );
        assert!(harness.supervisor.state().is_connected());

        harness.finish().await;
    }
}

#[cfg(test)]
mod config_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{SensorType, UnknownSensorPolicy};

    use crate::harness::Harness;

    const CONFIG: &str = r#"
[service]
name = "edge-ingest"

[broker]
url = "tcp://broker:1883"
topics = "site/+/+/e/+"

[routing]
unknown_sensor_policy = "reject"
model_sensor_types = ["co2"]

[time_series]
kind = "log"

[worker_pool]
core_size = 1
max_size = 2
queue_capacity = 4
"#;

    /// Loaded config drives routing policy and model subset
    #[tokio::test]
    async fn test_config_drives_pipeline() {
        let blueprint = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        assert_eq!(blueprint.routing.unknown_sensor_policy, UnknownSensorPolicy::Reject);

        let harness = Harness::start(&blueprint).await;
        harness
            .publish("site/n/roomA/e/temperature", r#"{"time":1,"value":20}"#)
            .await;
        harness
            .publish("site/n/roomA/e/co2", r#"{"time":2,"value":700}"#)
            .await;
        harness
            .publish("site/n/roomA/e/pressure", r#"{"time":3,"value":1013}"#)
            .await;
        harness.wait_for_messages(3).await;

        let ingestion = harness.ingestion.clone();
        let sink = harness.sink.clone();
        let client = harness.client.clone();
        harness.finish().await;
        let metrics = ingestion.metrics().snapshot();

        assert_eq!(metrics.unsupported_types, 1);
        assert_eq!(sink.len(), 2);
        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request.sensor_type, SensorType::Co2);
    }
}
