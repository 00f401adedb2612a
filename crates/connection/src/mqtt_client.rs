//! rumqttc-backed transport
//!
//! A driver task polls the rumqttc `EventLoop`, forwards publishes as
//! `TransportEvent`s and keeps re-polling after errors, which is how rumqttc
//! reconnects on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{BrokerConfig, QualityOfService, RawMessage, TELEMETRY_QOS};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::client::{status_topic, MqttTransport, TransportEvent, STATUS_OFFLINE};
use crate::error::{ConnectionError, Result};

/// Outcome of the first CONNACK wait
#[derive(Debug, Clone, PartialEq)]
enum LinkStatus {
    Pending,
    Up,
    Failed(String),
}

/// Real MQTT transport
///
/// Each `connect()` builds a fresh client/event loop pair from the stored
/// options, so a forced reconnect never inherits a wedged socket.
pub struct RumqttTransport {
    client_id: String,
    broker: String,
    options: MqttOptions,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    request_capacity: usize,
    connected: Arc<AtomicBool>,
    link: Arc<watch::Sender<LinkStatus>>,
    client: Mutex<Option<AsyncClient>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl RumqttTransport {
    /// Create a transport (disconnected state)
    ///
    /// The last-will (`offline`, retained) is registered here so it also
    /// covers drops the supervisor never sees.
    pub fn new(config: &BrokerConfig, client_id: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into();
        let (host, port) = config.address()?;

        let mut options = MqttOptions::new(client_id.clone(), host.clone(), port);
        options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(config.clean_session)
            .set_last_will(LastWill::new(
                status_topic(&client_id),
                STATUS_OFFLINE,
                to_qos(TELEMETRY_QOS),
                true,
            ));

        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (link, _) = watch::channel(LinkStatus::Pending);

        Ok(Self {
            client_id,
            broker: format!("{host}:{port}"),
            options,
            connect_timeout: config.connect_timeout(),
            reconnect_delay: config.reconnect_delay(),
            request_capacity: config.event_capacity.max(1),
            connected: Arc::new(AtomicBool::new(false)),
            link: Arc::new(link),
            client: Mutex::new(None),
            driver: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    fn current_client(&self) -> Result<AsyncClient> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ConnectionError::NotConnected)
    }

    fn stop_driver(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        self.stop_driver();
    }
}

impl MqttTransport for RumqttTransport {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn broker(&self) -> &str {
        &self.broker
    }

    #[instrument(name = "mqtt_connect", skip(self), fields(broker = %self.broker, client_id = %self.client_id))]
    async fn connect(&self) -> Result<()> {
        self.stop_driver();

        let (client, eventloop) = AsyncClient::new(self.options.clone(), self.request_capacity);
        self.link.send_replace(LinkStatus::Pending);
        let mut link_rx = self.link.subscribe();

        let driver = tokio::spawn(drive(
            eventloop,
            DriverContext {
                connected: Arc::clone(&self.connected),
                link: Arc::clone(&self.link),
                events: self.events_tx.clone(),
                reconnect_delay: self.reconnect_delay,
            },
        ));
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);
        *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(driver);

        let status = tokio::time::timeout(
            self.connect_timeout,
            link_rx.wait_for(|s| *s != LinkStatus::Pending),
        )
        .await
        .map(|r| r.map(|s| s.clone()));

        match status {
            Ok(Ok(LinkStatus::Up)) => {
                info!("broker session established");
                Ok(())
            }
            Ok(Ok(LinkStatus::Failed(message))) => {
                self.stop_driver();
                Err(ConnectionError::connect_failed(&self.broker, message))
            }
            Ok(Ok(LinkStatus::Pending)) | Ok(Err(_)) => {
                self.stop_driver();
                Err(ConnectionError::Closed)
            }
            Err(_) => {
                self.stop_driver();
                Err(ConnectionError::ConnectTimeout {
                    broker: self.broker.clone(),
                    timeout_secs: self.connect_timeout.as_secs(),
                })
            }
        }
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> Result<()> {
        let client = self
            .current_client()
            .map_err(|e| ConnectionError::subscribe(topic, e.to_string()))?;
        client
            .subscribe(topic, to_qos(qos))
            .await
            .map_err(|e| ConnectionError::subscribe(topic, e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let client = self
            .current_client()
            .map_err(|e| ConnectionError::subscribe(topic, e.to_string()))?;
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| ConnectionError::subscribe(topic, e.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QualityOfService,
        retain: bool,
        payload: Bytes,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectionError::publish(topic, "not connected"));
        }
        let client = self
            .current_client()
            .map_err(|e| ConnectionError::publish(topic, e.to_string()))?;
        // try_publish: a full request queue surfaces as an error instead of blocking
        client
            .try_publish(topic, to_qos(qos), retain, payload.to_vec())
            .map_err(|e| ConnectionError::publish(topic, e.to_string()))
    }

    #[instrument(name = "mqtt_disconnect", skip(self), fields(broker = %self.broker))]
    async fn disconnect(&self) -> Result<()> {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "disconnect request not delivered");
            }
        }

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut driver) = driver {
            if tokio::time::timeout(self.connect_timeout, &mut driver)
                .await
                .is_err()
            {
                warn!("event loop did not flush the disconnect in time, aborting");
                driver.abort();
            }
        }

        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

struct DriverContext {
    connected: Arc<AtomicBool>,
    link: Arc<watch::Sender<LinkStatus>>,
    events: mpsc::Sender<TransportEvent>,
    reconnect_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Event loop bookkeeping
///
/// Keeps polling after the event receiver is dropped so unsubscribe,
/// offline status and DISCONNECT issued during shutdown still go out.
struct Driver {
    ctx: DriverContext,
    established: bool,
    receiver_gone: bool,
}

impl Driver {
    fn new(ctx: DriverContext) -> Self {
        Self {
            ctx,
            established: false,
            receiver_gone: false,
        }
    }

    async fn on_event(
        &mut self,
        event: std::result::Result<Event, rumqttc::ConnectionError>,
    ) -> Flow {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                self.ctx.connected.store(true, Ordering::Release);
                if self.established {
                    info!("broker link re-established");
                    self.forward(TransportEvent::Connected).await;
                } else {
                    self.established = true;
                    self.ctx.link.send_replace(LinkStatus::Up);
                }
                Flow::Continue
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = RawMessage::new(publish.topic, publish.payload);
                self.forward(TransportEvent::Message(message)).await;
                Flow::Continue
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                self.ctx.connected.store(false, Ordering::Release);
                Flow::Stop
            }
            Ok(_) => Flow::Continue,
            Err(e) => {
                let was_connected = self.ctx.connected.swap(false, Ordering::AcqRel);
                if !self.established {
                    self.ctx.link.send_replace(LinkStatus::Failed(e.to_string()));
                    return Flow::Stop;
                }
                if was_connected {
                    warn!(error = %e, "broker link lost");
                    self.forward(TransportEvent::Disconnected(e.to_string())).await;
                } else {
                    debug!(error = %e, "reconnect attempt failed");
                }
                tokio::time::sleep(self.ctx.reconnect_delay).await;
                Flow::Continue
            }
        }
    }

    /// Deliver to the supervisor; discard once it stopped listening
    async fn forward(&mut self, event: TransportEvent) {
        if self.receiver_gone {
            return;
        }
        if self.ctx.events.send(event).await.is_err() {
            self.receiver_gone = true;
            debug!("event receiver dropped, discarding further deliveries");
        }
    }
}

/// Poll the event loop until DISCONNECT goes out or the first connect fails
async fn drive(mut eventloop: EventLoop, ctx: DriverContext) {
    let mut driver = Driver::new(ctx);
    while driver.on_event(eventloop.poll().await).await == Flow::Continue {}
    driver.ctx.connected.store(false, Ordering::Release);
}

fn to_qos(qos: QualityOfService) -> QoS {
    match qos {
        QualityOfService::AtMostOnce => QoS::AtMostOnce,
        QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
        QualityOfService::ExactlyOnce => QoS::ExactlyOnce,
    }
}
