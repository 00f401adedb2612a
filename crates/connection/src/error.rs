//! Connection error types

use contracts::ContractError;
use thiserror::Error;

/// Connection specific error
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Broker refused or dropped the initial connect
    #[error("failed to connect to broker '{broker}': {message}")]
    ConnectFailed { broker: String, message: String },

    /// No CONNACK within the connect timeout
    #[error("connect to broker '{broker}' timed out after {timeout_secs}s")]
    ConnectTimeout { broker: String, timeout_secs: u64 },

    /// Subscribe / unsubscribe request rejected
    #[error("subscription to '{topic}' failed: {message}")]
    Subscribe { topic: String, message: String },

    /// Publish request rejected
    #[error("publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },

    /// Operation requires an established link
    #[error("transport is not connected")]
    NotConnected,

    /// Event stream already taken or transport shut down
    #[error("transport closed")]
    Closed,

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl ConnectionError {
    /// Create connect failure
    pub fn connect_failed(broker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            broker: broker.into(),
            message: message.into(),
        }
    }

    /// Create subscribe failure
    pub fn subscribe(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create publish failure
    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, ConnectionError>;
