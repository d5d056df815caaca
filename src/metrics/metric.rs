//! Metric objects and their collector wire form.

use serde::Serialize;
use std::collections::BTreeMap;

pub const AGGREGATION_TEMPORALITY_CUMULATIVE: &str = "AGGREGATION_TEMPORALITY_CUMULATIVE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonically accumulating counter
    Sum,
    /// Point-in-time value
    Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Double(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Int(v) => *v as f64,
            MetricValue::Double(v) => *v,
        }
    }
}

/// A named, tagged observation ready for delivery.
///
/// The `source` attribute is not part of the tags; the sink adds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub kind: MetricKind,
    pub value: MetricValue,
    pub tags: BTreeMap<String, String>,
    /// Nanoseconds since the Unix epoch, as a decimal string
    pub time_unix_nano: String,
}

impl Metric {
    fn new(name: &str, unit: &str, kind: MetricKind, value: MetricValue) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            kind,
            value,
            tags: BTreeMap::new(),
            time_unix_nano: crate::logging::now_nanos(),
        }
    }

    /// Integer sum; `value` is rounded.
    pub fn sum(name: &str, unit: &str, value: f64) -> Self {
        Self::new(name, unit, MetricKind::Sum, MetricValue::Int(value.round() as i64))
    }

    pub fn sum_double(name: &str, unit: &str, value: f64) -> Self {
        Self::new(name, unit, MetricKind::Sum, MetricValue::Double(value))
    }

    pub fn gauge(name: &str, unit: &str, value: f64) -> Self {
        Self::new(name, unit, MetricKind::Gauge, MetricValue::Double(value))
    }

    /// Integer gauge; `value` is rounded.
    pub fn gauge_int(name: &str, unit: &str, value: f64) -> Self {
        Self::new(name, unit, MetricKind::Gauge, MetricValue::Int(value.round() as i64))
    }

    pub fn with_tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEnvelope {
    pub resource_metrics: Vec<ResourceMetrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetrics {
    pub scope_metrics: Vec<ScopeMetrics>,
}

#[derive(Debug, Serialize)]
pub struct ScopeMetrics {
    pub metrics: Vec<WireMetric>,
}

#[derive(Debug, Serialize)]
pub struct WireMetric {
    pub name: String,
    pub unit: String,
    #[serde(flatten)]
    pub data: WireData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WireData {
    #[serde(rename_all = "camelCase")]
    Sum {
        data_points: Vec<DataPoint>,
        aggregation_temporality: &'static str,
        is_monotonic: bool,
    },
    #[serde(rename_all = "camelCase")]
    Gauge { data_points: Vec<DataPoint> },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_int: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_double: Option<f64>,
    pub time_unix_nano: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Serialize)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub string_value: String,
}

fn attribute(key: &str, value: &str) -> Attribute {
    Attribute {
        key: key.to_string(),
        value: AttributeValue {
            string_value: value.to_string(),
        },
    }
}

impl WireMetric {
    /// Wire form of `metric`, with `source` as the first attribute.
    pub fn from_metric(metric: &Metric, source: &str) -> Self {
        let mut attributes = Vec::with_capacity(metric.tags.len() + 1);
        attributes.push(attribute("source", source));
        attributes.extend(metric.tags.iter().map(|(k, v)| attribute(k, v)));

        let (as_int, as_double) = match metric.value {
            MetricValue::Int(v) => (Some(v), None),
            MetricValue::Double(v) => (None, Some(v)),
        };
        let data_points = vec![DataPoint {
            as_int,
            as_double,
            time_unix_nano: metric.time_unix_nano.clone(),
            attributes,
        }];

        let data = match metric.kind {
            MetricKind::Sum => WireData::Sum {
                data_points,
                aggregation_temporality: AGGREGATION_TEMPORALITY_CUMULATIVE,
                is_monotonic: true,
            },
            MetricKind::Gauge => WireData::Gauge { data_points },
        };

        Self {
            name: metric.name.clone(),
            unit: metric.unit.clone(),
            data,
        }
    }
}

/// Wrap `metrics` in the collector's resource/scope envelope.
pub fn build_envelope(metrics: &[Metric], source: &str) -> MetricsEnvelope {
    MetricsEnvelope {
        resource_metrics: vec![ResourceMetrics {
            scope_metrics: vec![ScopeMetrics {
                metrics: metrics
                    .iter()
                    .map(|m| WireMetric::from_metric(m, source))
                    .collect(),
            }],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sum_rounds_to_int() {
        let metric = Metric::sum("login_attempts", "count", 2.6);
        assert_eq!(metric.value, MetricValue::Int(3));
        assert_eq!(metric.kind, MetricKind::Sum);
    }

    #[test]
    fn sum_envelope_shape() {
        let mut metric = Metric::sum("login_attempts", "count", 2.0).with_tag("status", "failed");
        metric.time_unix_nano = "1700000000000000000".to_string();

        let value = serde_json::to_value(build_envelope(&[metric], "jwt-pizza-service")).unwrap();
        assert_eq!(
            value,
            json!({
                "resourceMetrics": [{
                    "scopeMetrics": [{
                        "metrics": [{
                            "name": "login_attempts",
                            "unit": "count",
                            "sum": {
                                "dataPoints": [{
                                    "asInt": 2,
                                    "timeUnixNano": "1700000000000000000",
                                    "attributes": [
                                        {"key": "source", "value": {"stringValue": "jwt-pizza-service"}},
                                        {"key": "status", "value": {"stringValue": "failed"}}
                                    ]
                                }],
                                "aggregationTemporality": "AGGREGATION_TEMPORALITY_CUMULATIVE",
                                "isMonotonic": true
                            }
                        }]
                    }]
                }]
            })
        );
    }

    #[test]
    fn gauge_carries_double_and_sorted_tags() {
        let metric = Metric::gauge("request_latency", "ms", 12.5)
            .with_tag("type", "avg")
            .with_tag("method", "GET");

        let wire = serde_json::to_value(WireMetric::from_metric(&metric, "svc")).unwrap();
        let point = &wire["gauge"]["dataPoints"][0];
        assert_eq!(point["asDouble"], json!(12.5));
        assert!(point.get("asInt").is_none());

        let keys: Vec<&str> = point["attributes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["source", "method", "type"]);
        assert!(wire.get("sum").is_none());
    }
}
