//! CorrelationContext - per-message identifiers
//!
//! Created fresh for each inbound message and moved along with it, so that
//! log lines and the remote prediction call can be tied back to one event.

use tracing::Span;
use uuid::Uuid;

/// Per-message correlation identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    trace_id: String,
    message_id: String,
    source: String,
}

impl CorrelationContext {
    /// Create a context with freshly generated ids
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            message_id: Uuid::new_v4().to_string(),
            source: source.into(),
        }
    }

    /// Create a context from known ids
    pub fn with_ids(
        trace_id: impl Into<String>,
        message_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            message_id: message_id.into(),
            source: source.into(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Span carrying all correlation fields
    ///
    /// Everything logged inside it (including spawned work instrumented with
    /// it) is tagged with `trace_id` / `message_id` / `source`.
    pub fn span(&self, name: &'static str) -> Span {
        tracing::info_span!(
            "correlated",
            stage = name,
            trace_id = %self.trace_id,
            message_id = %self.message_id,
            source = %self.source,
        )
    }
}
