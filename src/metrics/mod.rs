//! Batched metric delivery.
//!
//! Producers ([`LoginMetrics`], [`OrderMetrics`], [`RequestMetrics`],
//! [`LatencyMetrics`], [`SystemMetrics`]) wrap a [`MetricBatcher`] each and
//! reduce their raw events into [`Metric`]s, which a [`MetricsSink`] delivers.
//! Delivery is best-effort: failures are logged and never reach the code that
//! recorded the event.

pub mod batcher;
pub mod error;
pub mod latency;
pub mod login;
pub mod metric;
mod mock_sink;
pub mod order;
pub mod registry;
pub mod request;
pub mod sink;
pub mod system;

pub use batcher::{BatchItem, MetricBatcher, Reducer};
pub use error::{ReportError, SinkError};
pub use latency::LatencyMetrics;
pub use login::{LoginMetrics, LoginStatus};
pub use metric::{build_envelope, Metric, MetricKind, MetricValue};
pub use mock_sink::MockSink;
pub use order::OrderMetrics;
pub use registry::BatcherRegistry;
pub use request::RequestMetrics;
pub use sink::{send_gauge, send_sum, HttpMetricsSink, MetricsSink};
pub use system::{SystemMetricType, SystemMetrics};
