//! # Connection
//!
//! MQTT connection supervision.
//!
//! Responsibilities:
//! - Abstract the broker link behind `MqttTransport`
//! - Connect, subscribe and announce presence (`client/status/{clientId}`)
//! - Detect stale links and reconnect with explicit resubscription
//! - Deliver inbound messages to a `MessageHandler`
//!
//! ## Feature Flags
//!
//! - `real-mqtt`: Enable the rumqttc-backed transport

pub mod client;
pub mod error;
pub mod mock_client;
pub mod state;
pub mod supervisor;

#[cfg(feature = "real-mqtt")]
pub mod mqtt_client;

pub use client::{generate_client_id, MqttTransport, TransportEvent};
pub use error::{ConnectionError, Result};
pub use mock_client::{MockTransport, MockTransportConfig};
pub use state::{ConnectionPhase, ConnectionState};
pub use supervisor::{ConnectionSupervisor, LivenessOutcome, SupervisorHandle, SupervisorSettings};

#[cfg(feature = "real-mqtt")]
pub use mqtt_client::RumqttTransport;
