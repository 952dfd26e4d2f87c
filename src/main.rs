use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use olympic::analytics::AnalyticsLogger;
use olympic::api;
use olympic::auth::AccountManager;
use olympic::config::{Config, DatabaseBackend};
use olympic::links::LinkRegistry;
use olympic::storage::{PostgresStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections)
                    .await
                    .context("failed to open SQLite database")?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await
                    .context("failed to connect to PostgreSQL")?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await.context("failed to initialize schema")?;
    info!("Database initialized successfully");

    // Services are built once and shared by reference
    let analytics = Arc::new(AnalyticsLogger::new(
        Arc::clone(&storage),
        &config.analytics,
    ));
    let accounts = Arc::new(AccountManager::new(Arc::clone(&storage), &config.auth));
    let links = Arc::new(LinkRegistry::new(
        Arc::clone(&storage),
        Arc::clone(&analytics),
        &config.links,
    ));

    let api_router = api::create_api_router(accounts, links);

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind {api_addr}"))?;
    info!("API server listening on http://{}", api_addr);

    axum::serve(api_listener, api_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining analytics");
    if !analytics.shutdown().await {
        warn!("Some analytics events were not persisted");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
