use ledger_gateway::api::{router, AppState};
use ledger_gateway::backend;
use ledger_gateway::config::Config;
use ledger_gateway::context::Context;
use ledger_gateway::ledger::{Resolver, UnconfiguredEngineFactory};
use ledger_gateway::storage::Driver;

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup log directory
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());

    std::fs::create_dir_all(&log_dir).unwrap_or_else(|e| {
        eprintln!("Warning: Could not create log directory {}: {}", log_dir, e);
    });

    // Create file appender with daily rotation
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "ledger-gateway.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ledger_gateway=debug")),
        )
        // Console output
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        // File output with JSON format for easy parsing
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(non_blocking),
        )
        .init();

    debug!("Logging initialized - log directory: {}", log_dir);

    // Load environment from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file found or error loading it: {}", e);
    }

    let config = Config::from_env()?;
    let socket_addr = config.socket_addr()?;

    info!("Starting ledger gateway on {}", socket_addr);
    info!("Storage flavor: {} (driver {:?})", config.flavor, config.driver_name());
    info!("Request timeout: {:?}", config.request_timeout);

    let backend = backend::open(config.flavor, &config.driver_names, &config.backend_options())?;
    let driver_name = config.driver_name().unwrap_or_default().to_string();
    let driver = Arc::new(Driver::new(driver_name, backend));

    // The catalog must be reachable before serving anything.
    driver
        .initialize(&Context::with_timeout(Duration::from_secs(30)))
        .await?;

    let resolver = Arc::new(Resolver::new(driver.clone(), Arc::new(UnconfiguredEngineFactory)));
    let state = Arc::new(AppState::new(resolver.clone(), config.request_timeout));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&socket_addr).await?;
    info!("Server listening on {}", socket_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    resolver.close_all().await;
    driver.close(&Context::background()).await?;

    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
