//! Process telemetry.
//!
//! `init_telemetry()` installs the tracing subscriber. [`Telemetry`] is the
//! composition root for metric producers: it owns every producer and the
//! [`BatcherRegistry`] used to stop them on shutdown.

use crate::config::{AppConfig, Environment, MetricsConfig};
use crate::metrics::{
    BatcherRegistry, HttpMetricsSink, LatencyMetrics, LoginMetrics, MetricsSink, OrderMetrics,
    RequestMetrics, SystemMetrics,
};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, with `info` added as the default directive.
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// All metric producers sharing one sink and one registry.
#[derive(Debug)]
pub struct Telemetry {
    pub login: LoginMetrics,
    pub order: OrderMetrics,
    pub request: RequestMetrics,
    pub latency: LatencyMetrics,
    pub system: SystemMetrics,
    registry: BatcherRegistry,
    sink: Arc<dyn MetricsSink>,
}

impl Telemetry {
    /// Build every producer. Must be called from within a tokio runtime.
    ///
    /// System sampling is not started; call [`SystemMetrics::start`].
    pub fn new(sink: Arc<dyn MetricsSink>, config: &MetricsConfig, environment: Environment) -> Self {
        let registry = BatcherRegistry::new();
        let batch_interval = config.batch_interval(environment);

        Self {
            login: LoginMetrics::new(sink.clone(), &registry, batch_interval),
            order: OrderMetrics::new(sink.clone(), &registry, batch_interval),
            request: RequestMetrics::new(sink.clone(), &registry, batch_interval),
            latency: LatencyMetrics::new(sink.clone(), &registry, batch_interval),
            system: SystemMetrics::new(
                sink.clone(),
                &registry,
                batch_interval,
                config.collection_interval(environment),
            ),
            registry,
            sink,
        }
    }

    /// Producers delivering to the configured HTTP collector.
    pub fn from_config(config: &AppConfig) -> Self {
        let sink: Arc<dyn MetricsSink> = Arc::new(HttpMetricsSink::from_config(&config.metrics));
        Self::new(sink, &config.metrics, config.environment)
    }

    pub fn registry(&self) -> &BatcherRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    /// Stop sampling and every batcher. Queued items are dropped.
    pub fn shutdown(&self) -> usize {
        self.system.stop();
        self.registry.stop_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MockSink;

    fn metrics_config() -> MetricsConfig {
        MetricsConfig {
            url: "http://127.0.0.1:1/otlp/v1/metrics".to_string(),
            source: "pizza-service-test".to_string(),
            api_key: "key".to_string(),
            batch_interval_ms: None,
            collection_interval_ms: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_producer_is_registered() {
        let telemetry = Telemetry::new(
            Arc::new(MockSink::new()),
            &metrics_config(),
            Environment::Development,
        );

        let mut names = telemetry.registry().names();
        names.sort_unstable();
        assert_eq!(names, vec!["latency", "login", "order", "request", "system"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let telemetry = Telemetry::new(
            Arc::new(MockSink::new()),
            &metrics_config(),
            Environment::Production,
        );
        telemetry.system.start();

        // The system batcher unregisters itself; the other four are stopped
        // through the registry.
        assert_eq!(telemetry.shutdown(), 4);
        assert!(telemetry.registry().is_empty());
        assert!(!telemetry.system.is_collecting());
        assert!(telemetry.login.batcher().is_stopped());
        assert!(telemetry.order.batcher().is_stopped());
    }
}
