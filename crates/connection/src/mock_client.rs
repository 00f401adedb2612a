//! Mock MQTT 传输
//!
//! 用于单元测试与 mock 运行模式，记录所有调用并支持注入消息与失败场景。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use contracts::{QualityOfService, RawMessage};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::client::{MqttTransport, TransportEvent};
use crate::error::{ConnectionError, Result};

/// Mock 传输配置
#[derive(Debug, Clone)]
pub struct MockTransportConfig {
    /// 客户端 ID
    pub client_id: String,
    /// 事件通道容量
    pub event_capacity: usize,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            client_id: "mock-client".to_string(),
            event_capacity: 100,
        }
    }
}

/// 一次 publish 调用记录
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

/// Mock MQTT 传输
pub struct MockTransport {
    config: MockTransportConfig,
    connected: AtomicBool,
    /// 接下来多少次 connect 调用失败
    failing_connects: AtomicUsize,
    /// 接下来多少次 subscribe 调用失败
    failing_subscribes: AtomicUsize,
    /// publish 是否失败
    fail_publish: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<String>>,
    publishes: Mutex<Vec<PublishRecord>>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl MockTransport {
    /// 创建默认 mock 传输
    pub fn new() -> Self {
        Self::with_config(MockTransportConfig::default())
    }

    /// 使用配置创建 mock 传输
    pub fn with_config(config: MockTransportConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            config,
            connected: AtomicBool::new(false),
            failing_connects: AtomicUsize::new(0),
            failing_subscribes: AtomicUsize::new(0),
            fail_publish: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            subscribe_calls: Mutex::new(Vec::new()),
            unsubscribe_calls: Mutex::new(Vec::new()),
            publishes: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// 让接下来 `count` 次 connect 失败
    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// 让接下来 `count` 次 subscribe 失败 (模拟 SUBACK 失败)
    pub fn fail_next_subscribes(&self, count: usize) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// 设置 publish 是否失败
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// 注入一条入站消息
    pub async fn inject_message(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.events_tx
            .send(TransportEvent::Message(RawMessage::new(topic, payload.into())))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// 模拟连接中断
    pub async fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self
            .events_tx
            .send(TransportEvent::Disconnected(reason.to_string()))
            .await;
    }

    /// 模拟传输自身的自动重连
    pub async fn restore_connection(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events_tx.send(TransportEvent::Connected).await;
    }

    /// 静默断开（不发送事件），模拟未被察觉的链路丢失
    pub fn sever_silently(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// 所有 subscribe 调用（按调用顺序）
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.unsubscribe_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publishes(&self) -> Vec<PublishRecord> {
        self.publishes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 发往指定 topic 的 publish 调用
    pub fn publishes_to(&self, topic: &str) -> Vec<PublishRecord> {
        self.publishes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttTransport for MockTransport {
    fn client_id(&self) -> &str {
        &self.config.client_id
    }

    fn broker(&self) -> &str {
        "mock://broker"
    }

    #[instrument(name = "mock_mqtt_connect", skip(self))]
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectionError::connect_failed(
                self.broker(),
                "mock failure",
            ));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(name = "mock_mqtt_subscribe", skip(self, _qos), fields(topic = %topic))]
    async fn subscribe(&self, topic: &str, _qos: QualityOfService) -> Result<()> {
        self.ensure_connected()
            .map_err(|e| ConnectionError::subscribe(topic, e.to_string()))?;
        let failing = self
            .failing_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectionError::subscribe(topic, "suback failure"));
        }
        self.subscribe_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.ensure_connected()
            .map_err(|e| ConnectionError::subscribe(topic, e.to_string()))?;
        self.unsubscribe_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        _qos: QualityOfService,
        retain: bool,
        payload: Bytes,
    ) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(ConnectionError::publish(topic, "mock failure"));
        }
        self.ensure_connected()
            .map_err(|e| ConnectionError::publish(topic, e.to_string()))?;
        self.publishes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishRecord {
                topic: topic.to_string(),
                payload,
                retain,
            });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
