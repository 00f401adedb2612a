//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Broker connection error
    #[error("Failed to connect to MQTT broker at {broker}: {message}")]
    BrokerConnection { broker: String, message: String },

    /// Real transport requested but not compiled in
    #[cfg_attr(feature = "real-mqtt", allow(dead_code))]
    #[error("built without the `real-mqtt` feature; rerun with --mock")]
    TransportUnavailable,
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn broker_connection(broker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrokerConnection {
            broker: broker.into(),
            message: message.into(),
        }
    }
}
