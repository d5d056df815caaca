use super::batcher::{BatchItem, MetricBatcher, Reducer};
use super::error::SinkError;
use super::metric::Metric;
use super::registry::BatcherRegistry;
use super::sink::MetricsSink;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMetricType {
    Sold,
    Failed,
    Revenue,
}

impl OrderMetricType {
    pub const ALL: [OrderMetricType; 3] = [
        OrderMetricType::Sold,
        OrderMetricType::Failed,
        OrderMetricType::Revenue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderMetricType::Sold => "sold",
            OrderMetricType::Failed => "failed",
            OrderMetricType::Revenue => "revenue",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub kind: OrderMetricType,
    pub value: f64,
}

impl BatchItem for OrderEvent {
    fn id(&self) -> String {
        self.kind.as_str().to_string()
    }

    fn zeroed(&self) -> Self {
        Self {
            value: 0.0,
            ..self.clone()
        }
    }
}

struct OrderReducer;

#[async_trait]
impl Reducer<OrderEvent> for OrderReducer {
    async fn reduce(&self, items: Vec<OrderEvent>) -> Vec<Metric> {
        OrderMetricType::ALL
            .into_iter()
            .filter_map(|kind| {
                let mut matching = items.iter().filter(|item| item.kind == kind).peekable();
                matching.peek()?;
                let total: f64 = matching.map(|item| item.value).sum();

                let metric = match kind {
                    OrderMetricType::Revenue => Metric::gauge("order", "bitcoin", total),
                    OrderMetricType::Sold | OrderMetricType::Failed => {
                        Metric::sum("order", "count", total)
                    }
                };
                Some(metric.with_tag("type", kind.as_str()))
            })
            .collect()
    }
}

/// Order outcome counters and revenue.
#[derive(Debug)]
pub struct OrderMetrics {
    batcher: MetricBatcher<OrderEvent>,
}

impl OrderMetrics {
    pub fn new(sink: Arc<dyn MetricsSink>, registry: &BatcherRegistry, interval: Duration) -> Self {
        Self {
            batcher: MetricBatcher::new("order", interval, OrderReducer, sink, registry),
        }
    }

    pub fn record_sold(&self) {
        self.batcher.push(OrderEvent {
            kind: OrderMetricType::Sold,
            value: 1.0,
        });
    }

    pub fn record_failed(&self) {
        self.batcher.push(OrderEvent {
            kind: OrderMetricType::Failed,
            value: 1.0,
        });
    }

    pub fn record_revenue(&self, amount: f64) {
        self.batcher.push(OrderEvent {
            kind: OrderMetricType::Revenue,
            value: amount,
        });
    }

    pub async fn flush(&self) -> Result<usize, SinkError> {
        self.batcher.flush().await
    }

    pub fn batcher(&self) -> &MetricBatcher<OrderEvent> {
        &self.batcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricKind, MetricValue, MockSink};

    fn find<'a>(metrics: &'a [Metric], kind: &str) -> Option<&'a Metric> {
        metrics.iter().find(|m| m.tag("type") == Some(kind))
    }

    #[tokio::test(start_paused = true)]
    async fn sold_and_failed_are_sums_revenue_is_gauge() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let orders = OrderMetrics::new(sink.clone(), &registry, Duration::from_secs(3600));

        orders.record_sold();
        orders.record_sold();
        orders.record_failed();
        orders.record_revenue(0.0042);
        orders.record_revenue(0.0008);
        orders.flush().await.unwrap();

        let sent = sink.metrics();
        assert_eq!(sent.len(), 3);

        let sold = find(&sent, "sold").unwrap();
        assert_eq!(sold.kind, MetricKind::Sum);
        assert_eq!(sold.value, MetricValue::Int(2));
        assert_eq!(sold.unit, "count");

        let failed = find(&sent, "failed").unwrap();
        assert_eq!(failed.value, MetricValue::Int(1));

        let revenue = find(&sent, "revenue").unwrap();
        assert_eq!(revenue.kind, MetricKind::Gauge);
        assert_eq!(revenue.unit, "bitcoin");
        assert!((revenue.value.as_f64() - 0.005).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_types_are_not_reported() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let orders = OrderMetrics::new(sink.clone(), &registry, Duration::from_secs(3600));

        orders.record_sold();
        orders.flush().await.unwrap();

        let sent = sink.metrics();
        assert_eq!(sent.len(), 1);
        assert!(find(&sent, "revenue").is_none());
    }
}
