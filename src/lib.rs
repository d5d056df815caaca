pub mod config;
pub mod database;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod telemetry;

pub use database::{Database, DbError};
pub use telemetry::Telemetry;
