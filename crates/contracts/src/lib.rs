//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Readings carry the publisher's `time` field (epoch milliseconds) as their clock
//! - `RawMessage` additionally carries the local receive time

mod blueprint;
mod correlation;
mod error;
mod handler;
mod point;
mod sensor;
mod sink;

pub use blueprint::*;
pub use correlation::CorrelationContext;
pub use error::*;
pub use handler::{LocalMessageHandler, LocalReadingDispatcher, MessageHandler, ReadingDispatcher};
pub use point::{TimeSeriesPoint, SENSOR_MEASUREMENT};
pub use sensor::*;
pub use sink::*;
