//! HTTP metric sink against a local capture collector.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use pizza_service::metrics::{
    BatcherRegistry, HttpMetricsSink, LoginMetrics, Metric, MetricsSink, SinkError,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug)]
struct Captured {
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct Collector {
    status: StatusCode,
    sender: mpsc::UnboundedSender<Captured>,
}

async fn collect(
    State(collector): State<Collector>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let _ = collector.sender.send(Captured {
        authorization,
        body,
    });
    collector.status
}

/// Start a collector that answers every POST with `status`.
async fn start_collector(status: StatusCode) -> (String, Arc<Mutex<mpsc::UnboundedReceiver<Captured>>>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/otlp/v1/metrics", post(collect))
        .with_state(Collector { status, sender });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (
        format!("http://{}/otlp/v1/metrics", addr),
        Arc::new(Mutex::new(receiver)),
    )
}

async fn next_capture(receiver: &Arc<Mutex<mpsc::UnboundedReceiver<Captured>>>) -> Captured {
    tokio::time::timeout(Duration::from_secs(5), receiver.lock().await.recv())
        .await
        .expect("collector received nothing")
        .expect("collector channel closed")
}

#[tokio::test(flavor = "multi_thread")]
async fn sink_posts_envelope_with_bearer_auth() {
    let (url, receiver) = start_collector(StatusCode::OK).await;
    let sink = HttpMetricsSink::new(url, "jwt-pizza-service", "secret-key");

    sink.send(vec![
        Metric::sum("http_requests", "count", 3.0).with_tag("method", "GET"),
        Metric::gauge("request_latency", "ms", 12.5).with_tag("type", "avg"),
    ])
    .await
    .unwrap();

    let captured = next_capture(&receiver).await;
    assert_eq!(captured.authorization.as_deref(), Some("Bearer secret-key"));

    let metrics = &captured.body["resourceMetrics"][0]["scopeMetrics"][0]["metrics"];
    assert_eq!(metrics.as_array().unwrap().len(), 2);

    let requests = &metrics[0];
    assert_eq!(requests["name"], "http_requests");
    assert_eq!(requests["unit"], "count");
    assert_eq!(requests["sum"]["aggregationTemporality"], "AGGREGATION_TEMPORALITY_CUMULATIVE");
    assert_eq!(requests["sum"]["isMonotonic"], true);
    let point = &requests["sum"]["dataPoints"][0];
    assert_eq!(point["asInt"], 3);
    assert_eq!(point["attributes"][0]["key"], "source");
    assert_eq!(point["attributes"][0]["value"]["stringValue"], "jwt-pizza-service");
    assert_eq!(point["attributes"][1]["key"], "method");

    let latency = &metrics[1]["gauge"]["dataPoints"][0];
    assert_eq!(latency["asDouble"], 12.5);
    assert!(latency.get("asInt").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn non_success_status_is_rejected() {
    let (url, receiver) = start_collector(StatusCode::UNAUTHORIZED).await;
    let sink = HttpMetricsSink::new(url, "svc", "wrong-key");

    let err = sink
        .send(vec![Metric::sum("active_users", "count", 1.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::Rejected { status: 401, .. }));

    // The collector still saw the attempt.
    next_capture(&receiver).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn login_metrics_flush_reaches_collector() {
    let (url, receiver) = start_collector(StatusCode::OK).await;
    let sink: Arc<dyn MetricsSink> = Arc::new(HttpMetricsSink::new(url, "svc", "key"));
    let registry = BatcherRegistry::new();
    let logins = LoginMetrics::new(sink, &registry, Duration::from_secs(3600));

    logins.record_success();
    logins.record_failure();
    logins.record_failure();
    logins.flush().await.unwrap();

    let captured = next_capture(&receiver).await;
    let metrics = captured.body["resourceMetrics"][0]["scopeMetrics"][0]["metrics"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(metrics.len(), 2);

    let count_for = |status: &str| {
        metrics
            .iter()
            .find(|m| {
                m["sum"]["dataPoints"][0]["attributes"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .any(|a| a["key"] == "status" && a["value"]["stringValue"] == status)
            })
            .map(|m| m["sum"]["dataPoints"][0]["asInt"].as_i64().unwrap())
    };
    assert_eq!(count_for("success"), Some(1));
    assert_eq!(count_for("failed"), Some(2));

    assert_eq!(registry.stop_all(), 1);
}
