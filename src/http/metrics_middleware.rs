use crate::http::app_server::AppState;
use crate::logging::HttpLogData;
use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use std::time::Instant;

/// Axum middleware that records per-request telemetry.
///
/// Counts the request by method, records its latency against the matched
/// route, and ships an http log record. All three are queued without I/O, so
/// the middleware adds no latency to the hot path.
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    matched_path: Option<MatchedPath>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let authorized = request.headers().contains_key(AUTHORIZATION);
    let path = request.uri().path().to_owned();
    let route = matched_path
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| path.clone());

    state.telemetry.request.record(&method);

    let response = next.run(request).await;

    state
        .telemetry
        .latency
        .record(&method, &route, None, start.elapsed());

    if let Some(shipper) = &state.shipper {
        shipper.http(HttpLogData {
            authorized,
            path,
            method,
            status_code: response.status().as_u16(),
            req_body: serde_json::Value::Null,
            res_body: serde_json::Value::Null,
        });
    }

    response
}
