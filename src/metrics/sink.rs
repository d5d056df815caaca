use super::error::SinkError;
use super::metric::{build_envelope, Metric};
use crate::config::MetricsConfig;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::fmt::Debug;

/// Destination for reduced metrics.
#[async_trait]
pub trait MetricsSink: Debug + Send + Sync {
    /// Deliver one batch. An empty batch is a no-op.
    async fn send(&self, metrics: Vec<Metric>) -> Result<(), SinkError>;
}

/// Posts metrics as JSON to an OTLP-style collector with bearer auth.
pub struct HttpMetricsSink {
    client: reqwest::Client,
    url: String,
    source: String,
    authorization: String,
}

impl Debug for HttpMetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMetricsSink")
            .field("url", &self.url)
            .field("source", &self.source)
            .finish()
    }
}

impl HttpMetricsSink {
    pub fn new(url: impl Into<String>, source: impl Into<String>, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            source: source.into(),
            authorization: format!("Bearer {}", api_key),
        }
    }

    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(&config.url, &config.source, &config.api_key)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[async_trait]
impl MetricsSink for HttpMetricsSink {
    async fn send(&self, metrics: Vec<Metric>) -> Result<(), SinkError> {
        if metrics.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&build_envelope(&metrics, &self.source))?;
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, &self.authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Send a single integer sum immediately, bypassing any batcher.
pub async fn send_sum(
    sink: &dyn MetricsSink,
    name: &str,
    unit: &str,
    value: f64,
    tags: &[(&str, &str)],
) -> Result<(), SinkError> {
    let metric = tags
        .iter()
        .fold(Metric::sum(name, unit, value), |m, (k, v)| m.with_tag(k, *v));
    sink.send(vec![metric]).await
}

/// Send a single double gauge immediately, bypassing any batcher.
pub async fn send_gauge(
    sink: &dyn MetricsSink,
    name: &str,
    unit: &str,
    value: f64,
    tags: &[(&str, &str)],
) -> Result<(), SinkError> {
    let metric = tags
        .iter()
        .fold(Metric::gauge(name, unit, value), |m, (k, v)| m.with_tag(k, *v));
    sink.send(vec![metric]).await
}
