use crate::database::Database;
use crate::http::handlers::{health_handler, menu_handler};
use crate::http::metrics_middleware::metrics_middleware;
use crate::logging::LogShipper;
use crate::telemetry::Telemetry;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Debug)]
pub struct AppState {
    pub db: Arc<Database>,
    pub telemetry: Arc<Telemetry>,
    pub shipper: Option<LogShipper>,
}

pub struct AppServer {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub const PATH_HEALTH: &str = "/api/health";
pub const PATH_MENU: &str = "/api/order/menu";

impl AppServer {
    pub fn new(db: Arc<Database>, telemetry: Arc<Telemetry>, shipper: Option<LogShipper>) -> Self {
        let state = Arc::new(AppState {
            db,
            telemetry,
            shipper,
        });
        AppServer {
            router: Router::new()
                .route(PATH_HEALTH, get(health_handler))
                .route(PATH_MENU, get(menu_handler))
                .route_layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
                .with_state(state.clone()),
            state,
        }
    }
}
