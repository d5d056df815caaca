use super::batcher::{BatchItem, MetricBatcher, Reducer};
use super::error::SinkError;
use super::metric::Metric;
use super::registry::BatcherRegistry;
use super::sink::MetricsSink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEvent {
    pub method: String,
    pub value: f64,
}

impl BatchItem for RequestEvent {
    fn id(&self) -> String {
        self.method.clone()
    }

    fn zeroed(&self) -> Self {
        Self {
            value: 0.0,
            ..self.clone()
        }
    }
}

struct RequestReducer;

#[async_trait]
impl Reducer<RequestEvent> for RequestReducer {
    async fn reduce(&self, items: Vec<RequestEvent>) -> Vec<Metric> {
        let mut per_method: BTreeMap<String, f64> = BTreeMap::new();
        for item in items {
            *per_method.entry(item.method).or_insert(0.0) += item.value;
        }

        per_method
            .into_iter()
            .map(|(method, count)| {
                Metric::sum("http_requests", "count", count).with_tag("method", method)
            })
            .collect()
    }
}

/// Request counts per HTTP method.
#[derive(Debug)]
pub struct RequestMetrics {
    batcher: MetricBatcher<RequestEvent>,
}

impl RequestMetrics {
    pub fn new(sink: Arc<dyn MetricsSink>, registry: &BatcherRegistry, interval: Duration) -> Self {
        Self {
            batcher: MetricBatcher::new("request", interval, RequestReducer, sink, registry),
        }
    }

    pub fn record(&self, method: &str) {
        self.batcher.push(RequestEvent {
            method: method.to_ascii_uppercase(),
            value: 1.0,
        });
    }

    pub async fn flush(&self) -> Result<usize, SinkError> {
        self.batcher.flush().await
    }

    pub fn batcher(&self) -> &MetricBatcher<RequestEvent> {
        &self.batcher
    }
}
