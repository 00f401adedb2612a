//! ConnectionSupervisor 核心实现
//!
//! 负责连接、订阅、存活检测与重连，并把入站消息交给 `MessageHandler`。

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{LivenessConfig, MessageHandler, QualityOfService, TELEMETRY_QOS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ping_topic, status_topic, MqttTransport, TransportEvent};
use crate::client::{STATUS_OFFLINE, STATUS_ONLINE};
use crate::error::{ConnectionError, Result};
use crate::state::{ConnectionPhase, ConnectionState};

const PING_PAYLOAD: &[u8] = b"ping";

/// Supervisor 运行参数
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// 订阅与状态发布的 QoS
    pub qos: QualityOfService,
    /// 存活检查周期
    pub check_interval: Duration,
    /// 超过该时长未收到消息视为 stale
    pub staleness_threshold: Duration,
    /// 强制断开后重连前的停顿
    pub reconnect_pause: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_liveness(&LivenessConfig::default())
    }
}

impl SupervisorSettings {
    pub fn from_liveness(config: &LivenessConfig) -> Self {
        Self {
            qos: TELEMETRY_QOS,
            check_interval: config.check_interval(),
            staleness_threshold: config.staleness_threshold(),
            reconnect_pause: config.reconnect_pause(),
        }
    }
}

/// 单次存活检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// 已连接且近期有消息
    Healthy,
    /// 已连接但 stale，已发送一次 ping
    Probed,
    /// 检查时未连接，重连成功
    Reconnected,
    /// 重连失败，等待下个周期
    ReconnectFailed,
    /// ping 发布失败，已强制断开并重连成功
    ForcedReconnect,
}

impl LivenessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Probed => "probed",
            Self::Reconnected => "reconnected",
            Self::ReconnectFailed => "reconnect_failed",
            Self::ForcedReconnect => "forced_reconnect",
        }
    }
}

/// Connection Supervisor
///
/// 独占 `ConnectionState`；传输层通过 `Arc` 持有，后台任务与 `stop()` 共享。
pub struct ConnectionSupervisor<T: MqttTransport> {
    transport: Arc<T>,
    state: Arc<ConnectionState>,
    settings: SupervisorSettings,
    status_topic: String,
    ping_topic: String,
}

impl<T: MqttTransport> ConnectionSupervisor<T> {
    /// 创建新的 Supervisor
    pub fn new(transport: Arc<T>, settings: SupervisorSettings) -> Self {
        let client_id = transport.client_id().to_string();
        Self {
            transport,
            state: Arc::new(ConnectionState::new()),
            settings,
            status_topic: status_topic(&client_id),
            ping_topic: ping_topic(&client_id),
        }
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// 首次连接并订阅所有 topic
    ///
    /// 只有初次连接失败会返回错误；订阅失败的 topic 记为待重试，
    /// 由存活检查补订。之后的断线同样由存活检查负责。
    #[instrument(
        name = "supervisor_start",
        skip(self, topics),
        fields(broker = %self.transport.broker(), client_id = %self.transport.client_id())
    )]
    pub async fn start(&self, topics: &[String]) -> Result<()> {
        self.state.set_topics(topics.iter().cloned());
        self.state.mark_connecting();

        if let Err(e) = self.transport.connect().await {
            self.state.mark_disconnected();
            error!(error = %e, "initial broker connect failed");
            return Err(e);
        }

        self.establish_session().await;
        info!(topics = topics.len(), "supervisor started");
        Ok(())
    }

    /// 注册消息处理器并启动事件任务与存活检查任务
    ///
    /// 事件流只能被取走一次，重复调用返回 `ConnectionError::Closed`。
    pub fn run<H>(self: &Arc<Self>, handler: Arc<H>) -> Result<SupervisorHandle>
    where
        H: MessageHandler + Sync + 'static,
    {
        let events = self.transport.take_events().ok_or(ConnectionError::Closed)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let event_task = tokio::spawn(Arc::clone(self).event_loop(
            events,
            handler,
            shutdown_rx.clone(),
        ));
        let liveness_task = tokio::spawn(Arc::clone(self).liveness_loop(shutdown_rx));

        info!(
            check_interval_secs = self.settings.check_interval.as_secs(),
            staleness_threshold_secs = self.settings.staleness_threshold.as_secs(),
            "supervisor loops running"
        );

        Ok(SupervisorHandle {
            shutdown_tx,
            event_task,
            liveness_task,
        })
    }

    /// 执行一次存活检查
    #[instrument(name = "supervisor_check_liveness", skip(self))]
    pub async fn check_liveness(&self) -> LivenessOutcome {
        let outcome = self.evaluate_liveness().await;
        observability::record_liveness_outcome(outcome.as_str());
        observability::record_connection_state(self.state.is_connected());
        outcome
    }

    async fn evaluate_liveness(&self) -> LivenessOutcome {
        if !self.transport.is_connected() {
            self.state.mark_disconnected();
            return match self.reconnect().await {
                Ok(()) => LivenessOutcome::Reconnected,
                Err(e) => {
                    warn!(error = %e, "reconnect failed, retrying next cycle");
                    LivenessOutcome::ReconnectFailed
                }
            };
        }

        self.subscribe_pending().await;

        let idle = self.state.since_last_message();
        observability::record_idle_seconds(idle.as_secs_f64());
        if idle <= self.settings.staleness_threshold {
            self.state.set_phase(ConnectionPhase::Connected);
            return LivenessOutcome::Healthy;
        }

        self.state.set_phase(ConnectionPhase::Stale);
        let probe = self
            .transport
            .publish(
                &self.ping_topic,
                self.settings.qos,
                false,
                Bytes::from_static(PING_PAYLOAD),
            )
            .await;

        match probe {
            Ok(()) => {
                debug!(idle_secs = idle.as_secs(), "link stale, keep-alive probe sent");
                LivenessOutcome::Probed
            }
            Err(e) => {
                warn!(error = %e, idle_secs = idle.as_secs(), "probe failed, forcing reconnect");
                if let Err(e) = self.transport.disconnect().await {
                    debug!(error = %e, "forced disconnect reported an error");
                }
                self.state.mark_disconnected();
                tokio::time::sleep(self.settings.reconnect_pause).await;

                match self.reconnect().await {
                    Ok(()) => LivenessOutcome::ForcedReconnect,
                    Err(e) => {
                        warn!(error = %e, "forced reconnect failed, retrying next cycle");
                        LivenessOutcome::ReconnectFailed
                    }
                }
            }
        }
    }

    /// 停止：退订所有 topic，发布 retained offline，断开连接
    ///
    /// 应在 `SupervisorHandle::shutdown` 之后调用。
    #[instrument(name = "supervisor_stop", skip(self), fields(client_id = %self.transport.client_id()))]
    pub async fn stop(&self) -> Result<()> {
        if self.transport.is_connected() {
            for topic in self.state.topics() {
                if let Err(e) = self.transport.unsubscribe(&topic).await {
                    warn!(topic = %topic, error = %e, "unsubscribe failed");
                }
            }
            if let Err(e) = self
                .transport
                .publish(
                    &self.status_topic,
                    self.settings.qos,
                    true,
                    Bytes::from_static(STATUS_OFFLINE),
                )
                .await
            {
                warn!(error = %e, "offline status not published");
            }
        }

        self.state.clear_topics();
        self.transport.disconnect().await?;
        self.state.mark_disconnected();
        observability::record_connection_state(false);
        info!("supervisor stopped");
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.state.mark_connecting();
        if let Err(e) = self.transport.connect().await {
            self.state.mark_disconnected();
            return Err(e);
        }
        self.establish_session().await;
        Ok(())
    }

    /// 连接建立后：发布 online，重新订阅 `subscribed_topics` 中的全部 topic
    async fn establish_session(&self) {
        self.state.mark_connected();
        observability::record_connection_state(true);

        if let Err(e) = self
            .transport
            .publish(
                &self.status_topic,
                self.settings.qos,
                true,
                Bytes::from_static(STATUS_ONLINE),
            )
            .await
        {
            warn!(error = %e, "online status not published");
        }

        let topics = self.state.topics();
        let failed = self.subscribe_all(&topics).await;
        if failed == 0 {
            info!(topics = topics.len(), "session established");
        } else {
            warn!(failed, topics = topics.len(), "session established with pending subscriptions");
        }
    }

    /// 补订上次失败的 topic
    async fn subscribe_pending(&self) {
        let pending = self.state.pending_topics();
        if pending.is_empty() {
            return;
        }
        let failed = self.subscribe_all(&pending).await;
        debug!(retried = pending.len(), failed, "pending subscriptions retried");
    }

    /// 逐个订阅；失败的 topic 记为待重试。返回失败数
    async fn subscribe_all(&self, topics: &[String]) -> usize {
        let mut failed = 0;
        for topic in topics {
            match self.transport.subscribe(topic, self.settings.qos).await {
                Ok(()) => {
                    self.state.mark_subscribed(topic);
                    debug!(topic = %topic, "subscribed");
                }
                Err(e) => {
                    self.state.mark_pending(topic);
                    warn!(topic = %topic, error = %e, "subscribe failed, retrying on next liveness check");
                    failed += 1;
                }
            }
        }
        failed
    }

    async fn event_loop<H>(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) where
        H: MessageHandler + Sync + 'static,
    {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(TransportEvent::Message(message)) => {
                        self.state.record_message();
                        handler.handle(message).await;
                    }
                    Some(TransportEvent::Connected) => self.establish_session().await,
                    Some(TransportEvent::Disconnected(reason)) => {
                        self.state.mark_disconnected();
                        observability::record_connection_state(false);
                        warn!(reason = %reason, "broker connection lost");
                    }
                    None => {
                        info!("transport event stream closed");
                        break;
                    }
                },
            }
        }
        debug!("event loop exited");
    }

    async fn liveness_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成，跳过
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let outcome = self.check_liveness().await;
                    debug!(outcome = outcome.as_str(), phase = self.state.phase().as_str(), "liveness check");
                }
            }
        }
        debug!("liveness loop exited");
    }
}

/// 后台任务句柄
///
/// `shutdown()` 通过 watch 信号取消两个任务并等待其退出。
pub struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
    event_task: JoinHandle<()>,
    liveness_task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// 任一后台任务已退出
    pub fn is_finished(&self) -> bool {
        self.event_task.is_finished() || self.liveness_task.is_finished()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, task) in [("event", self.event_task), ("liveness", self.liveness_task)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "supervisor task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_client::MockTransport;
    use contracts::RawMessage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<RawMessage>>,
    }

    impl MessageHandler for Recorder {
        async fn handle(&self, message: RawMessage) {
            self.messages.lock().unwrap().push(message);
        }
    }

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            qos: TELEMETRY_QOS,
            check_interval: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(120),
            reconnect_pause: Duration::from_secs(5),
        }
    }

    fn topics() -> Vec<String> {
        vec!["site/+/+/e/temperature".into(), "site/+/+/e/co2".into()]
    }

    async fn started() -> (Arc<MockTransport>, Arc<ConnectionSupervisor<MockTransport>>) {
        let transport = Arc::new(MockTransport::new());
        let supervisor = Arc::new(ConnectionSupervisor::new(transport.clone(), settings()));
        supervisor.start(&topics()).await.unwrap();
        (transport, supervisor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_subscribes_and_announces() {
        let (transport, supervisor) = started().await;

        assert_eq!(transport.subscribe_calls(), vec![
            "site/+/+/e/co2".to_string(),
            "site/+/+/e/temperature".to_string(),
        ]);
        let status = transport.publishes_to("client/status/mock-client");
        assert_eq!(status.len(), 1);
        assert_eq!(&status[0].payload[..], STATUS_ONLINE);
        assert!(status[0].retain);
        assert_eq!(supervisor.state().phase(), ConnectionPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_on_connect_error() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_connects(1);
        let supervisor = ConnectionSupervisor::new(transport.clone(), settings());

        let result = supervisor.start(&topics()).await;
        assert!(matches!(result, Err(ConnectionError::ConnectFailed { .. })));
        assert_eq!(supervisor.state().phase(), ConnectionPhase::Disconnected);
        assert!(transport.subscribe_calls().is_empty());
        // 订阅集合在订阅请求发出前已记录
        assert_eq!(supervisor.state().topics().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscribe_retried_by_liveness() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_subscribes(1);
        let supervisor = ConnectionSupervisor::new(transport.clone(), settings());

        supervisor.start(&topics()).await.unwrap();
        assert!(supervisor.state().is_connected());
        assert_eq!(transport.subscribe_calls(), vec!["site/+/+/e/temperature".to_string()]);
        assert_eq!(supervisor.state().pending_topics(), vec!["site/+/+/e/co2".to_string()]);

        assert_eq!(supervisor.check_liveness().await, LivenessOutcome::Healthy);
        assert_eq!(transport.subscribe_calls(), vec![
            "site/+/+/e/temperature".to_string(),
            "site/+/+/e/co2".to_string(),
        ]);
        assert!(supervisor.state().pending_topics().is_empty());

        // 已确认的 topic 不再重复订阅
        supervisor.check_liveness().await;
        assert_eq!(transport.subscribe_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_keeps_failing_until_broker_accepts() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_subscribes(4);
        let supervisor = ConnectionSupervisor::new(transport.clone(), settings());

        supervisor.start(&topics()).await.unwrap();
        assert_eq!(supervisor.state().pending_topics().len(), 2);

        supervisor.check_liveness().await;
        assert_eq!(supervisor.state().pending_topics().len(), 2);
        assert!(transport.subscribe_calls().is_empty());

        supervisor.check_liveness().await;
        assert!(supervisor.state().pending_topics().is_empty());
        assert_eq!(transport.subscribe_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_when_recent_message() {
        let (transport, supervisor) = started().await;

        tokio::time::advance(Duration::from_secs(60)).await;
        supervisor.state().record_message();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(supervisor.check_liveness().await, LivenessOutcome::Healthy);
        assert!(transport.publishes_to("client/ping/mock-client").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_probe_per_stale_check() {
        let (transport, supervisor) = started().await;

        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(supervisor.check_liveness().await, LivenessOutcome::Probed);
        assert_eq!(supervisor.state().phase(), ConnectionPhase::Stale);
        assert_eq!(transport.publishes_to("client/ping/mock-client").len(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(supervisor.check_liveness().await, LivenessOutcome::Probed);
        assert_eq!(transport.publishes_to("client/ping/mock-client").len(), 2);

        supervisor.state().record_message();
        assert_eq!(supervisor.check_liveness().await, LivenessOutcome::Healthy);
        assert_eq!(supervisor.state().phase(), ConnectionPhase::Connected);
        assert_eq!(transport.publishes_to("client/ping/mock-client").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resubscribes_every_topic() {
        let (transport, supervisor) = started().await;
        transport.sever_silently();

        assert_eq!(supervisor.check_liveness().await, LivenessOutcome::Reconnected);
        assert_eq!(transport.connect_calls(), 2);
        let subs = transport.subscribe_calls();
        assert_eq!(subs.len(), 4);
        assert_eq!(subs[2..], subs[..2]);
        assert_eq!(transport.publishes_to("client/status/mock-client").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_failure_is_not_fatal() {
        let (transport, supervisor) = started().await;
        transport.sever_silently();
        transport.fail_next_connects(1);

        assert_eq!(supervisor.check_liveness().await, LivenessOutcome::ReconnectFailed);
        assert_eq!(supervisor.state().phase(), ConnectionPhase::Disconnected);

        assert_eq!(supervisor.check_liveness().await, LivenessOutcome::Reconnected);
        assert!(supervisor.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_forces_reconnect() {
        let (transport, supervisor) = started().await;
        transport.set_fail_publish(true);

        tokio::time::advance(Duration::from_secs(121)).await;
        let outcome = supervisor.check_liveness().await;

        assert_eq!(outcome, LivenessOutcome::ForcedReconnect);
        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(transport.connect_calls(), 2);
        assert_eq!(transport.subscribe_calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_delivers_messages() {
        let (transport, supervisor) = started().await;
        let recorder = Arc::new(Recorder::default());
        let handle = supervisor.run(recorder.clone()).unwrap();

        tokio::time::advance(Duration::from_secs(100)).await;
        transport
            .inject_message("site/n/roomA/e/temperature", r#"{"time":1,"value":2}"#)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(recorder.messages.lock().unwrap().len(), 1);
        assert!(supervisor.state().since_last_message() < Duration::from_secs(1));

        assert!(matches!(supervisor.run(recorder.clone()), Err(ConnectionError::Closed)));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_reconnect_event_resubscribes() {
        let (transport, supervisor) = started().await;
        let handle = supervisor.run(Arc::new(Recorder::default())).unwrap();

        transport.drop_connection("broker went away").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!supervisor.state().is_connected());

        transport.restore_connection().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(supervisor.state().is_connected());
        assert_eq!(transport.subscribe_calls().len(), 4);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_loop_probes_on_interval() {
        let transport = Arc::new(MockTransport::new());
        let supervisor = Arc::new(ConnectionSupervisor::new(
            transport.clone(),
            SupervisorSettings {
                check_interval: Duration::from_secs(1),
                staleness_threshold: Duration::from_secs(3),
                ..settings()
            },
        ));
        supervisor.start(&topics()).await.unwrap();
        let handle = supervisor.run(Arc::new(Recorder::default())).unwrap();

        tokio::time::sleep(Duration::from_millis(5500)).await;
        handle.shutdown().await;

        // ticks at 1..=5s, stale after 3s: probes at 4s and 5s
        assert_eq!(transport.publishes_to("client/ping/mock-client").len(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.publishes_to("client/ping/mock-client").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unsubscribes_and_goes_offline() {
        let (transport, supervisor) = started().await;
        supervisor.stop().await.unwrap();

        assert_eq!(transport.unsubscribe_calls().len(), 2);
        let status = transport.publishes_to("client/status/mock-client");
        assert_eq!(&status.last().unwrap().payload[..], STATUS_OFFLINE);
        assert!(status.last().unwrap().retain);
        assert_eq!(transport.disconnect_calls(), 1);
        assert!(!supervisor.state().is_connected());
        assert!(supervisor.state().topics().is_empty());
    }

    struct FailingHandler;

    impl MessageHandler for FailingHandler {
        async fn handle(&self, _message: RawMessage) {
            panic!("handler failed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_early_exit() {
        let (transport, supervisor) = started().await;
        let handle = supervisor.run(Arc::new(FailingHandler)).unwrap();
        assert!(!handle.is_finished());

        transport
            .inject_message("site/a/b/e/temperature", "21.5")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(handle.is_finished());
        handle.shutdown().await;
    }
}
