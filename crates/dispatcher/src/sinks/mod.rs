//! Sink implementations
//!
//! Contains InfluxSink, LogSink, and MemorySink.

mod influx;
mod log;
mod memory;

pub use self::influx::InfluxSink;
pub use self::log::LogSink;
pub use self::memory::MemorySink;
