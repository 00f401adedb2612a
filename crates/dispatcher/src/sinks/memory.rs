//! MemorySink - keeps points in memory (tests, demos)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{ContractError, TimeSeriesPoint, TimeSeriesSink};

/// In-memory sink
///
/// Clones share the same storage, so a test can keep one clone and hand the
/// other to the dispatcher.
#[derive(Clone, Default)]
pub struct MemorySink {
    points: Arc<Mutex<Vec<TimeSeriesPoint>>>,
    failing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Points written so far
    pub fn points(&self) -> Vec<TimeSeriesPoint> {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TimeSeriesSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, point: &TimeSeriesPoint) -> Result<(), ContractError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ContractError::sink_write("memory", "injected failure"));
        }
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(point.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ContractError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
