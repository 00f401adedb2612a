//! LogSink - logs points via tracing (dry runs)

use contracts::{ContractError, TimeSeriesPoint, TimeSeriesSink};
use tracing::{info, instrument};

/// Sink that logs time-series points instead of storing them
pub struct LogSink {
    name: String,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TimeSeriesSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, point),
        fields(sink = %self.name)
    )]
    async fn write(&self, point: &TimeSeriesPoint) -> Result<(), ContractError> {
        info!(
            sink = %self.name,
            line = %point.to_line_protocol(),
            "time-series point"
        );
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}
