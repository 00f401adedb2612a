//! MQTT transport abstraction
//!
//! Defines the broker link trait, supporting the rumqttc implementation and mock testing.

use std::future::Future;

use bytes::Bytes;
use contracts::{QualityOfService, RawMessage};
use tokio::sync::mpsc;

use crate::error::Result;

/// Events emitted by a transport's driver
#[derive(Debug)]
pub enum TransportEvent {
    /// Link re-established by the transport's own reconnect policy
    ///
    /// Not emitted for an explicit `connect()`; the caller already knows.
    Connected,
    /// Link lost
    Disconnected(String),
    /// Inbound publish
    Message(RawMessage),
}

/// MQTT transport trait
///
/// Abstracts the broker link so the supervisor can run against a real broker or a mock.
/// All methods take `&self`; implementations use interior mutability.
pub trait MqttTransport: Send + Sync + 'static {
    /// Client identifier used for the session, status and ping topics
    fn client_id(&self) -> &str;

    /// Broker address for logs and errors
    fn broker(&self) -> &str;

    /// Establish the link, resolving once the broker acknowledged the session
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to a topic filter
    fn subscribe(&self, topic: &str, qos: QualityOfService)
        -> impl Future<Output = Result<()>> + Send;

    /// Remove a topic filter
    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<()>> + Send;

    /// Enqueue a publish
    ///
    /// Resolves once the request is handed to the link, never waits for a broker reply.
    fn publish(
        &self,
        topic: &str,
        qos: QualityOfService,
        retain: bool,
        payload: Bytes,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Close the link cleanly
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;

    /// Take the event receiver
    ///
    /// Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;
}

/// Build a client id from the configured prefix and a random 8-hex suffix
pub fn generate_client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

/// Retained presence topic, also used for the last-will
pub fn status_topic(client_id: &str) -> String {
    format!("client/status/{client_id}")
}

/// Keep-alive probe topic
pub fn ping_topic(client_id: &str) -> String {
    format!("client/ping/{client_id}")
}

/// Presence payloads
pub const STATUS_ONLINE: &[u8] = b"online";
pub const STATUS_OFFLINE: &[u8] = b"offline";
