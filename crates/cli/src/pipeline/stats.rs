//! Pipeline statistics and summary printing.

use std::time::Duration;

use dispatcher::{PoolSnapshot, ShutdownReport, SinkSnapshot};
use ingestion::MetricsSnapshot;

/// Statistics from a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Router / decoder counters
    pub ingestion: MetricsSnapshot,

    /// Time-series write counters
    pub sink: SinkSnapshot,

    /// Prediction pool counters
    pub pool: PoolSnapshot,

    /// How the pool shut down
    pub pool_report: ShutdownReport,
}

impl PipelineStats {
    /// Messages handled per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.ingestion.messages_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Rejected messages as percentage of received
    pub fn reject_rate(&self) -> f64 {
        if self.ingestion.messages_received > 0 {
            (self.ingestion.rejected() as f64 / self.ingestion.messages_received as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Messages received: {}", self.ingestion.messages_received);
        println!("   └─ Throughput: {:.2} msg/s", self.throughput());

        println!("\n📥 Ingestion");
        println!("   ├─ Readings dispatched: {}", self.ingestion.readings_dispatched);
        println!("   ├─ Skipped (non-telemetry): {}", self.ingestion.messages_skipped);
        println!("   ├─ Invalid topics: {}", self.ingestion.invalid_topics);
        println!("   ├─ Invalid payloads: {}", self.ingestion.invalid_payloads);
        println!("   ├─ Unsupported types: {}", self.ingestion.unsupported_types);
        println!("   └─ Reject rate: {:.2}%", self.reject_rate());

        println!("\n📤 Time-series");
        println!("   ├─ Points written: {}", self.sink.write_count);
        println!("   └─ Write failures: {}", self.sink.failure_count);

        println!("\n🔮 Prediction");
        println!("   ├─ Submitted: {}", self.pool.submitted);
        println!("   ├─ Delivered: {}", self.pool.completed);
        println!("   ├─ Rejected (4xx): {}", self.pool.rejected);
        println!("   ├─ Failed: {}", self.pool.failed);
        println!("   ├─ Backpressure waits: {}", self.pool.blocked);
        match self.pool_report {
            ShutdownReport::Drained => println!("   └─ Shutdown: drained"),
            ShutdownReport::TimedOut { aborted } => {
                println!("   └─ Shutdown: timed out, {} aborted", aborted)
            }
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(received: u64, invalid_payloads: u64) -> PipelineStats {
        PipelineStats {
            duration: Duration::from_secs(2),
            ingestion: MetricsSnapshot {
                messages_received: received,
                invalid_payloads,
                ..Default::default()
            },
            sink: SinkSnapshot::default(),
            pool: PoolSnapshot::default(),
            pool_report: ShutdownReport::Drained,
        }
    }

    #[test]
    fn test_rates() {
        let s = stats(10, 2);
        assert_eq!(s.throughput(), 5.0);
        assert_eq!(s.reject_rate(), 20.0);
    }

    #[test]
    fn test_rates_empty_run() {
        let mut s = stats(0, 0);
        s.duration = Duration::ZERO;
        assert_eq!(s.throughput(), 0.0);
        assert_eq!(s.reject_rate(), 0.0);
    }
}
