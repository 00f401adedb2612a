//! Pipeline configuration and metrics

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::{PipelineBlueprint, UnknownSensorPolicy};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// `source` field of every correlation context (service name)
    pub source: String,

    /// Handling of sensor types outside the known set
    pub unknown_sensor_policy: UnknownSensorPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_blueprint(&PipelineBlueprint::default())
    }
}

impl PipelineConfig {
    pub fn from_blueprint(blueprint: &PipelineBlueprint) -> Self {
        Self {
            source: blueprint.service.name.clone(),
            unknown_sensor_policy: blueprint.routing.unknown_sensor_policy,
        }
    }
}

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Total messages handed over by the transport
    pub messages_received: AtomicU64,

    /// Readings passed to the dispatcher
    pub readings_dispatched: AtomicU64,

    /// Non-telemetry messages dropped by the router
    pub messages_skipped: AtomicU64,

    /// Topic errors
    pub invalid_topics: AtomicU64,

    /// Payload errors
    pub invalid_payloads: AtomicU64,

    /// Rejected unknown sensor types
    pub unsupported_types: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.readings_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.messages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejection by error kind
    pub fn record_rejected(&self, error: &crate::IngestionError) {
        let counter = match error {
            crate::IngestionError::InvalidTopic { .. } => &self.invalid_topics,
            crate::IngestionError::InvalidPayload { .. } => &self.invalid_payloads,
            crate::IngestionError::UnsupportedSensorType { .. } => &self.unsupported_types,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            readings_dispatched: self.readings_dispatched.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            invalid_topics: self.invalid_topics.load(Ordering::Relaxed),
            invalid_payloads: self.invalid_payloads.load(Ordering::Relaxed),
            unsupported_types: self.unsupported_types.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub readings_dispatched: u64,
    pub messages_skipped: u64,
    pub invalid_topics: u64,
    pub invalid_payloads: u64,
    pub unsupported_types: u64,
}

impl MetricsSnapshot {
    /// All rejected messages
    pub fn rejected(&self) -> u64 {
        self.invalid_topics + self.invalid_payloads + self.unsupported_types
    }
}
