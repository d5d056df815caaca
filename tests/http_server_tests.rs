use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use pizza_service::config::{ConnectionConfig, DbConfig, Environment, MetricsConfig};
use pizza_service::database::Database;
use pizza_service::http::app_server::{AppServer, PATH_HEALTH, PATH_MENU};
use pizza_service::metrics::{MetricsSink, MockSink};
use pizza_service::Telemetry;
use std::sync::Arc;
use tower::util::ServiceExt;

/// Router over a database nothing listens for and an in-memory metric sink.
fn setup_test() -> (Router, Arc<Telemetry>) {
    let db = Database::new(DbConfig {
        connection: ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "root".to_string(),
            password: "root".to_string(),
            database: "pizza".to_string(),
            connect_timeout_ms: 1_000,
        },
        list_per_page: 10,
        seed_admin: false,
    });

    let metrics = MetricsConfig {
        url: "http://127.0.0.1:1/otlp/v1/metrics".to_string(),
        source: "pizza-service-test".to_string(),
        api_key: "key".to_string(),
        batch_interval_ms: Some(3_600_000),
        collection_interval_ms: None,
    };
    let sink: Arc<dyn MetricsSink> = Arc::new(MockSink::new());
    let telemetry = Arc::new(Telemetry::new(sink, &metrics, Environment::Development));

    let app = AppServer::new(Arc::new(db), telemetry.clone(), None);
    (app.router, telemetry)
}

async fn get(router: Router, path: &str) -> Result<axum::response::Response> {
    Ok(router
        .oneshot(Request::builder().method("GET").uri(path).body(Body::empty())?)
        .await?)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_endpoint() -> Result<()> {
    let (router, _telemetry) = setup_test();

    let response = get(router, PATH_HEALTH).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;

    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "pizza-service");
    assert_eq!(json["database"], "idle");

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_requests_are_counted_and_timed() -> Result<()> {
    let (router, telemetry) = setup_test();

    get(router, PATH_HEALTH).await?;

    assert_eq!(telemetry.request.batcher().pending(), 1);
    assert_eq!(telemetry.latency.batcher().pending(), 1);

    telemetry.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_route_is_not_timed() -> Result<()> {
    let (router, telemetry) = setup_test();

    let response = get(router, "/api/nowhere").await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(telemetry.latency.batcher().pending(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_menu_database_failure_is_generic_500() -> Result<()> {
    let (router, _telemetry) = setup_test();

    let response = get(router, PATH_MENU).await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;

    assert_eq!(json["error"]["code"], "INTERNAL_SERVER_ERROR");
    assert_eq!(json["error"]["message"], "internal server error");
    assert!(!json["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("127.0.0.1"));

    Ok(())
}
