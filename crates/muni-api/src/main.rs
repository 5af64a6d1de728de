//! # muni-api — Binary Entry Point
//!
//! Starts the Axum HTTP server for the municipal back office.
//! Configuration comes from `PORT`, `AUTH_TOKEN`, `DATABASE_URL` and
//! `OVERDUE_SWEEP_SECS`.

use muni_api::state::{AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Build configuration from environment.
    let defaults = AppConfig::default();
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(defaults.port);
    let overdue_sweep_secs: u64 = std::env::var("OVERDUE_SWEEP_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults.overdue_sweep_secs);
    let config = AppConfig {
        port,
        auth_token: std::env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
        database_url: std::env::var("DATABASE_URL").ok(),
        overdue_sweep_secs,
    };
    if config.auth_token.is_none() {
        tracing::warn!("AUTH_TOKEN not set, every request runs as the administrator");
    }
    tracing::debug!(?config, "configuration loaded");

    // Initialize database pool (optional — absent means in-memory only).
    let db_pool = muni_api::db::init_pool(config.database_url.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Database initialization failed: {e}");
            e
        })?;

    let state = AppState::with_pool(config, db_pool);

    // Hydrate in-memory stores from database (if connected).
    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    muni_api::serve(state).await?;

    Ok(())
}
