use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use harrow_core::CrawlerConfig;
use harrow_db::{Database, DatabaseConfig};
use harrow_server::routes;
use harrow_server::state::AppState;

/// One request token replenished every 100ms per client IP.
const RATE_LIMIT_PERIOD_MS: u64 = 100;
const RATE_LIMIT_BURST: u32 = 50;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harrow=info".parse()?))
        .with_target(false)
        .init();

    let api_key = std::env::var("HARROW_SERVER_API_KEY")
        .ok()
        .filter(|key| !key.is_empty())
        .context("HARROW_SERVER_API_KEY must be set")?;
    let port = std::env::var("HARROW_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let config = CrawlerConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db_config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&db_config)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;

    let state = Arc::new(AppState::new(db, api_key, config));

    let governor = GovernorConfigBuilder::default()
        .per_millisecond(RATE_LIMIT_PERIOD_MS)
        .burst_size(RATE_LIMIT_BURST)
        .finish()
        .context("Invalid rate limiter configuration")?;

    let app = routes::router(state)
        .layer(GovernorLayer::new(governor))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
