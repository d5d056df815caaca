use super::batcher::{BatchItem, MetricBatcher, Reducer};
use super::error::SinkError;
use super::metric::Metric;
use super::registry::BatcherRegistry;
use super::sink::MetricsSink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One observed request duration.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub method: String,
    pub route: String,
    pub endpoint_id: Option<String>,
    pub latency_ms: f64,
}

impl LatencySample {
    /// `method:route`, with `:endpoint` appended when present.
    pub fn key(&self) -> String {
        match &self.endpoint_id {
            Some(endpoint) => format!("{}:{}:{}", self.method, self.route, endpoint),
            None => format!("{}:{}", self.method, self.route),
        }
    }
}

impl BatchItem for LatencySample {
    fn id(&self) -> String {
        self.key()
    }

    fn zeroed(&self) -> Self {
        Self {
            latency_ms: 0.0,
            ..self.clone()
        }
    }
}

#[derive(Debug)]
struct LatencyStats {
    sample: LatencySample,
    count: u64,
    total: f64,
    max: f64,
    min: f64,
}

impl LatencyStats {
    fn new(sample: LatencySample) -> Self {
        let latency = sample.latency_ms;
        Self {
            sample,
            count: 1,
            total: latency,
            max: latency,
            min: latency,
        }
    }

    fn add(&mut self, latency: f64) {
        self.count += 1;
        self.total += latency;
        self.max = self.max.max(latency);
        self.min = self.min.min(latency);
    }

    /// Mean latency rounded to whole milliseconds.
    fn avg(&self) -> f64 {
        (self.total / self.count as f64).round()
    }

    fn metrics(&self) -> [Metric; 3] {
        let gauge = |value: f64, kind: &str| {
            let metric = Metric::gauge("request_latency", "ms", value)
                .with_tag("method", self.sample.method.as_str())
                .with_tag("route", self.sample.route.as_str())
                .with_tag("type", kind);
            match &self.sample.endpoint_id {
                Some(endpoint) => metric.with_tag("endpoint_id", endpoint.as_str()),
                None => metric,
            }
        };
        [
            gauge(self.avg(), "avg"),
            gauge(self.max, "max"),
            gauge(self.min, "min"),
        ]
    }
}

struct LatencyReducer;

#[async_trait]
impl Reducer<LatencySample> for LatencyReducer {
    async fn reduce(&self, items: Vec<LatencySample>) -> Vec<Metric> {
        let mut groups: BTreeMap<String, LatencyStats> = BTreeMap::new();
        for item in items {
            match groups.get_mut(&item.key()) {
                Some(stats) => stats.add(item.latency_ms),
                None => {
                    groups.insert(item.key(), LatencyStats::new(item));
                }
            }
        }

        groups.values().flat_map(LatencyStats::metrics).collect()
    }
}

/// Request latency avg/max/min per route.
#[derive(Debug)]
pub struct LatencyMetrics {
    batcher: MetricBatcher<LatencySample>,
}

impl LatencyMetrics {
    pub fn new(sink: Arc<dyn MetricsSink>, registry: &BatcherRegistry, interval: Duration) -> Self {
        Self {
            batcher: MetricBatcher::new("latency", interval, LatencyReducer, sink, registry),
        }
    }

    pub fn record(&self, method: &str, route: &str, endpoint_id: Option<&str>, latency: Duration) {
        // Two decimal places of a millisecond.
        let latency_ms = (latency.as_secs_f64() * 100_000.0).round() / 100.0;
        self.batcher.push(LatencySample {
            method: method.to_ascii_uppercase(),
            route: route.to_string(),
            endpoint_id: endpoint_id.map(str::to_string),
            latency_ms,
        });
    }

    pub async fn flush(&self) -> Result<usize, SinkError> {
        self.batcher.flush().await
    }

    pub fn batcher(&self) -> &MetricBatcher<LatencySample> {
        &self.batcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MockSink;

    fn value(metrics: &[Metric], route: &str, kind: &str) -> f64 {
        metrics
            .iter()
            .find(|m| m.tag("route") == Some(route) && m.tag("type") == Some(kind))
            .map(|m| m.value.as_f64())
            .unwrap()
    }

    #[test]
    fn key_includes_endpoint_when_present() {
        let mut sample = LatencySample {
            method: "GET".into(),
            route: "/api/order/menu".into(),
            endpoint_id: None,
            latency_ms: 1.0,
        };
        assert_eq!(sample.key(), "GET:/api/order/menu");
        sample.endpoint_id = Some("menu".into());
        assert_eq!(sample.key(), "GET:/api/order/menu:menu");
    }

    #[tokio::test(start_paused = true)]
    async fn avg_max_min_per_group() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let latency = LatencyMetrics::new(sink.clone(), &registry, Duration::from_secs(3600));

        latency.record("GET", "/api/order/menu", None, Duration::from_millis(10));
        latency.record("GET", "/api/order/menu", None, Duration::from_millis(25));
        latency.record("GET", "/api/order/menu", None, Duration::from_millis(40));
        latency.record("POST", "/api/auth", Some("login"), Duration::from_micros(3_500));
        latency.flush().await.unwrap();

        let sent = sink.metrics();
        assert_eq!(sent.len(), 6);
        assert!(sent.iter().all(|m| m.name == "request_latency" && m.unit == "ms"));

        assert_eq!(value(&sent, "/api/order/menu", "avg"), 25.0);
        assert_eq!(value(&sent, "/api/order/menu", "max"), 40.0);
        assert_eq!(value(&sent, "/api/order/menu", "min"), 10.0);

        assert_eq!(value(&sent, "/api/auth", "max"), 3.5);
        assert_eq!(value(&sent, "/api/auth", "avg"), 4.0);

        let auth = sent.iter().find(|m| m.tag("route") == Some("/api/auth")).unwrap();
        assert_eq!(auth.tag("endpoint_id"), Some("login"));
        assert_eq!(auth.tag("method"), Some("POST"));
        let menu = sent.iter().find(|m| m.tag("route") == Some("/api/order/menu")).unwrap();
        assert_eq!(menu.tag("endpoint_id"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_splits_groups() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let latency = LatencyMetrics::new(sink.clone(), &registry, Duration::from_secs(3600));

        latency.record("GET", "/api/franchise", Some("list"), Duration::from_millis(5));
        latency.record("GET", "/api/franchise", None, Duration::from_millis(7));
        latency.flush().await.unwrap();

        assert_eq!(sink.metrics().len(), 6);
    }
}
