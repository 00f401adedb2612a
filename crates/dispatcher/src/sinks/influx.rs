//! InfluxSink - writes line protocol to the InfluxDB v2 HTTP API

use contracts::{ContractError, TimeSeriesConfig, TimeSeriesPoint, TimeSeriesSink};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, info, instrument, warn};

/// InfluxDB v2 sink
///
/// One POST per point to `{url}/api/v2/write` with millisecond precision.
pub struct InfluxSink {
    name: String,
    client: reqwest::Client,
    write_url: String,
    org: String,
    bucket: String,
    token: Option<String>,
}

impl InfluxSink {
    /// Build the sink from configuration
    ///
    /// # Errors
    /// `SinkConnection` when the HTTP client cannot be built
    pub fn new(name: impl Into<String>, config: &TimeSeriesConfig) -> Result<Self, ContractError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ContractError::SinkConnection {
                sink_name: name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
            client,
            name,
        })
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }
}

impl TimeSeriesSink for InfluxSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "influx_sink_write",
        skip(self, point),
        fields(sink = %self.name, ts = point.timestamp_millis)
    )]
    async fn write(&self, point: &TimeSeriesPoint) -> Result<(), ContractError> {
        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(point.to_line_protocol());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(sink = %self.name, status = status.as_u16(), body = %body, "influx rejected write");
            return Err(ContractError::sink_write(
                &self.name,
                format!("status {}: {}", status.as_u16(), body),
            ));
        }

        debug!(sink = %self.name, "point written");
        Ok(())
    }

    async fn flush(&self) -> Result<(), ContractError> {
        // Every write is sent immediately
        Ok(())
    }

    #[instrument(name = "influx_sink_close", skip(self))]
    async fn close(&self) -> Result<(), ContractError> {
        info!(sink = %self.name, "InfluxSink closed");
        Ok(())
    }
}
