//! # Database Persistence Layer
//!
//! Postgres persistence for the back office via SQLx.
//!
//! ## Architecture
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, every
//! record is written through to PostgreSQL and the in-memory stores are
//! hydrated from it on start-up. When absent, the API operates in
//! in-memory-only mode (suitable for development and testing).
//!
//! ## Tables
//!
//! - `documents`: one JSONB document per record, keyed by collection and id
//! - `audit_log`: typed, append-only rows chained by SHA-256
//! - `reference_numbers`: every fine, levy, service and transaction number
//!   ever issued, so two processes never hand out the same one

pub mod audit;
pub mod documents;
pub mod references;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if no URL is given (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool(url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let url = match url {
        Some(url) if !url.trim().is_empty() => url,
        _ => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only mode. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    migrate(&pool).await?;

    Ok(Some(pool))
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
