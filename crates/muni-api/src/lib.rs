//! # muni-api — Axum API Services for the Municipal Tax Back Office
//!
//! Registry, billing, collection and staff administration of a municipal
//! treasury. Every record lives in an in-memory store, written through to
//! PostgreSQL when a database is configured. Every command is recorded in
//! a hash-chained audit log.
//!
//! ## API Surface
//!
//! | Prefix                         | Module                   | Domain                 |
//! |--------------------------------|--------------------------|------------------------|
//! | `/tributario/contribuyentes/*` | [`routes::taxpayers`]    | Taxpayer registry      |
//! | `/tributario/impuestos/*`      | [`routes::taxes`]        | Tax catalogue          |
//! | `/tributario/declaraciones/*`  | [`routes::declarations`] | Declarations           |
//! | `/tributario/retenciones/*`    | [`routes::withholdings`] | Withholdings           |
//! | `/tributario/comprobantes/*`   | [`routes::vouchers`]     | Fiscal vouchers        |
//! | `/multas/*`                    | [`routes::fines`]        | Fines                  |
//! | `/tasas/*`                     | [`routes::levies`]       | Municipal levies       |
//! | `/pagos/*`                     | [`routes::payments`]     | Payments               |
//! | `/servicios/*`                 | [`routes::services`]     | Utility services       |
//! | `/transacciones/*`             | [`routes::transactions`] | Treasury ledger        |
//! | `/personal/*`                  | [`routes::personnel`]    | Employees and accounts |
//! | `/roles/*`                     | [`routes::roles`]        | Roles and permissions  |
//! | `/auditoria/*`                 | [`routes::audit`]        | Audit log              |
//! | `/dashboard`                   | [`routes::dashboard`]    | Counters               |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → RateLimitMiddleware → AuthMiddleware → CommitScope → [AuditLayer] → Handler
//! ```
//!
//! With a database configured, [`commit`] serializes commands and rolls the
//! in-memory stores back when a write-through fails.
//!
//! ## OpenAPI
//!
//! Auto-generated OpenAPI document via utoipa derive macros at `/openapi.json`.

pub mod audit;
pub mod auth;
pub mod commit;
pub mod db;
pub mod error;
pub mod export;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod sweep;

pub use error::AppError;
pub use state::AppState;

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use axum::{Extension, Json, Router};

use crate::middleware::metrics::{ApiMetrics, MetricsSnapshot};
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) are mounted outside the auth middleware
/// so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let metrics = ApiMetrics::new();
    let limiter = RateLimiter::new(RateLimitConfig::default());

    // Authenticated API routes.
    let api = Router::new()
        // Tax registry
        .merge(routes::taxpayers::router())
        .merge(routes::taxes::router())
        .merge(routes::declarations::router())
        .merge(routes::withholdings::router())
        .merge(routes::vouchers::router())
        // Receivables and ledger
        .merge(routes::fines::router())
        .merge(routes::levies::router())
        .merge(routes::payments::router())
        .merge(routes::services::router())
        .merge(routes::transactions::router())
        // Staff, access control and oversight
        .merge(routes::personnel::router())
        .merge(routes::roles::router())
        .merge(routes::audit::router())
        .merge(routes::dashboard::router())
        .merge(openapi::router())
        .layer(from_fn_with_state(state.clone(), commit::commit_middleware))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(Extension(state.audit_sink()))
        .layer(Extension(metrics.clone()))
        .layer(Extension(limiter))
        .with_state(state.clone());

    // Unauthenticated health probes.
    let health = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/health/metrics", get(metrics_snapshot))
        .layer(Extension(metrics))
        .with_state(state);

    Router::new().merge(health).merge(api)
}

/// Bind `0.0.0.0:{port}` and serve [`app`] until the process stops,
/// running the background overdue sweep alongside.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let every = std::time::Duration::from_secs(state.config.overdue_sweep_secs);
    let _sweeper = sweep::spawn_periodic(state.clone(), every);

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("municipal back office API listening on {}", addr);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Liveness probe — always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe — 200 once the database, if any, answers a ping.
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let Some(pool) = &state.db_pool else {
        return (StatusCode::OK, "ready");
    };
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed: database unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}

/// Request counters since start-up.
async fn metrics_snapshot(Extension(metrics): Extension<ApiMetrics>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}
