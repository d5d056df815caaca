use crate::http::app_server::AppState;
use crate::http::error::ApiError;
use crate::model::MenuItem;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

/// Handler for GET /api/health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = state.db.is_connection_alive().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "pizza-service",
            "version": env!("CARGO_PKG_VERSION"),
            "database": if database { "connected" } else { "idle" },
        })),
    )
}

/// Handler for GET /api/order/menu
#[tracing::instrument(name = "handler_get_menu", skip(state))]
pub async fn menu_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<MenuItem>>, ApiError> {
    let menu = state.db.get_menu().await?;
    Ok(Json(menu))
}
