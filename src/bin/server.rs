use anyhow::Result;
use clap::Parser;
use pizza_service::config::AppConfig;
use pizza_service::database::Database;
use pizza_service::http::app_server::AppServer;
use pizza_service::logging::{LogShipper, LogWorker};
use pizza_service::telemetry::{init_telemetry, Telemetry};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "pizza-server", about = "Pizza HTTP Server")]
struct Cli {
    /// Path to config file
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let now = Instant::now();
    init_telemetry().map_err(|e| anyhow::anyhow!(e))?;

    let cli = Cli::parse();

    tracing::info!("Starting Pizza HTTP Server");

    // Load configuration
    let config = AppConfig::load(&cli.config)?;
    config.validate()?;

    tracing::info!("Configuration '{}' loaded successfully", &cli.config);

    let shipper = match &config.logging.url {
        Some(url) => {
            let (shipper, receiver) = LogShipper::channel(config.logging.source.clone());
            let worker = LogWorker::new(
                receiver,
                url.clone(),
                &config.logging.user_id,
                &config.logging.api_key,
            );
            tokio::spawn(worker.run());
            Some(shipper)
        }
        None => None,
    };

    let db = Arc::new(Database::with_log_shipper(config.db.clone(), shipper.clone()));
    let telemetry = Arc::new(Telemetry::from_config(&config));
    telemetry.system.start();

    tracing::info!("Telemetry initialized");

    let app = AppServer::new(db.clone(), telemetry.clone(), shipper);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server started in {}ms", now.elapsed().as_millis());
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown())
        .await?;

    // Unflushed metrics are dropped.
    let stopped = telemetry.shutdown();
    tracing::info!(batchers = stopped, "Metric batchers stopped");

    db.close_connection_now().await;

    tracing::info!("Server shutdown complete");

    Ok(())
}

async fn shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}
