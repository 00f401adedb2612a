//! # Ingestion Pipeline
//!
//! Sensor telemetry ingestion module.
//!
//! Responsibilities:
//! - Route topics to `(location, sensorType)` and drop non-telemetry messages
//! - Decode JSON payloads with bare or keyed numeric values
//! - Build a `SensorReading` per message under a fresh `CorrelationContext`
//! - Hand readings to a `ReadingDispatcher`
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{IngestionPipeline, PipelineConfig};
//!
//! let pipeline = Arc::new(IngestionPipeline::new(
//!     PipelineConfig::from_blueprint(&blueprint),
//!     dispatcher,
//! ));
//! let handle = supervisor.run(pipeline.clone())?;
//! ```

mod config;
mod decoder;
mod error;
mod pipeline;
mod router;

// Re-exports
pub use config::{IngestionMetrics, MetricsSnapshot, PipelineConfig};
pub use decoder::{decode, DecodedValue};
pub use error::{IngestionError, Result};
pub use pipeline::{IngestionPipeline, ProcessOutcome};
pub use router::{Route, TopicRouter, RESERVED_LORA};
