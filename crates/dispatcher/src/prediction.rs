//! Prediction clients
//!
//! - [`HttpPredictionClient`]: POSTs the JSON envelope to the model service
//! - [`LogPredictionClient`]: logs requests (dry runs)
//! - [`RecordingPredictionClient`]: records requests, scriptable failures

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use contracts::{
    ContractError, CorrelationContext, PredictionClient, PredictionConfig, PredictionRequest,
};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::error::DispatcherError;

/// Header names carrying correlation ids
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";
pub const MESSAGE_ID_HEADER: &str = "X-Message-Id";
pub const SOURCE_HEADER: &str = "X-Source";

/// HTTP client for the prediction service
pub struct HttpPredictionClient {
    client: reqwest::Client,
    url: String,
}

impl HttpPredictionClient {
    /// Build a client with the configured request timeout
    pub fn new(config: &PredictionConfig) -> Result<Self, DispatcherError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DispatcherError::sink_creation("prediction", e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

impl PredictionClient for HttpPredictionClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn predict(
        &self,
        request: &PredictionRequest,
        ctx: &CorrelationContext,
    ) -> Result<(), ContractError> {
        let response = self
            .client
            .post(&self.url)
            .header(TRACE_ID_HEADER, ctx.trace_id())
            .header(MESSAGE_ID_HEADER, ctx.message_id())
            .header(SOURCE_HEADER, ctx.source())
            .json(request)
            .send()
            .await
            .map_err(|e| ContractError::dispatch_failed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "prediction accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(ContractError::DispatchRejected {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(ContractError::dispatch_failed(format!(
                "status {}: {}",
                status.as_u16(),
                body
            )))
        }
    }
}

/// Logs each request and reports success
#[derive(Debug, Default)]
pub struct LogPredictionClient;

impl PredictionClient for LogPredictionClient {
    fn endpoint(&self) -> &str {
        "log://prediction"
    }

    async fn predict(
        &self,
        request: &PredictionRequest,
        _ctx: &CorrelationContext,
    ) -> Result<(), ContractError> {
        info!(
            location = %request.location,
            sensor_type = request.sensor_type.as_str(),
            value = request.value,
            "prediction request"
        );
        Ok(())
    }
}

/// One recorded prediction call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPrediction {
    pub request: PredictionRequest,
    pub trace_id: String,
    pub message_id: String,
}

/// In-process prediction client for tests and demos
///
/// Requests are recorded before the scripted outcome is applied.
#[derive(Default)]
pub struct RecordingPredictionClient {
    calls: Mutex<Vec<RecordedPrediction>>,
    reject_status: AtomicU16,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingPredictionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits for a permit from `gate` before returning
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Answer every call with this 4xx status (0 disables)
    pub fn reject_with(&self, status: u16) {
        self.reject_status.store(status, Ordering::SeqCst);
    }

    /// Fail every call as a network error
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every call
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self) -> Vec<RecordedPrediction> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PredictionClient for RecordingPredictionClient {
    fn endpoint(&self) -> &str {
        "memory://prediction"
    }

    async fn predict(
        &self,
        request: &PredictionRequest,
        ctx: &CorrelationContext,
    ) -> Result<(), ContractError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedPrediction {
                request: request.clone(),
                trace_id: ctx.trace_id().to_string(),
                message_id: ctx.message_id().to_string(),
            });

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| ContractError::dispatch_failed("gate closed"))?;
            permit.forget();
        }

        let status = self.reject_status.load(Ordering::SeqCst);
        if status != 0 {
            return Err(ContractError::DispatchRejected {
                status,
                body: "rejected".into(),
            });
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ContractError::dispatch_failed("connection refused"));
        }
        Ok(())
    }
}
