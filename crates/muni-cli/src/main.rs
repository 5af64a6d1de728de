//! # muni CLI entry point
//!
//! Operator commands for the municipal back office: run the API server,
//! apply database migrations, sweep past-due receivables to `OVERDUE`, and
//! verify the audit log hash chain.

use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use muni_api::state::{AppConfig, AppState};

/// Municipal tax back office operator CLI.
#[derive(Parser, Debug)]
#[command(name = "muni", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server.
    Serve(ServeArgs),

    /// Apply the embedded database migrations and exit.
    Migrate(DatabaseArgs),

    /// Move past-due fines and levies to OVERDUE once and exit.
    SweepOverdue(DatabaseArgs),

    /// Recompute the audit log hash chain and report breaks.
    AuditVerify(VerifyArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Shared bearer secret. Authentication is disabled when absent.
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// PostgreSQL URL. The server runs in-memory only when absent.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Seconds between background overdue sweeps; 0 disables them.
    #[arg(long, env = "OVERDUE_SWEEP_SECS", default_value_t = 3600)]
    overdue_sweep_secs: u64,
}

#[derive(Args, Debug)]
struct DatabaseArgs {
    /// PostgreSQL URL.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    #[command(flatten)]
    database: DatabaseArgs,

    /// Maximum number of entries to check, oldest first.
    #[arg(long, default_value_t = 1_000_000)]
    limit: i64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to start the async runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Serve(args) => serve(args).await,
            Commands::Migrate(args) => migrate(args).await,
            Commands::SweepOverdue(args) => sweep_overdue(args).await,
            Commands::AuditVerify(args) => audit_verify(args).await,
        }
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

/// Connect, migrate and hydrate a state backed by `database_url`.
async fn connect(database_url: Option<&str>, config: AppConfig) -> anyhow::Result<AppState> {
    let pool = muni_api::db::init_pool(database_url)
        .await
        .context("database initialization failed")?;
    let state = AppState::with_pool(config, pool);
    state
        .hydrate_from_db()
        .await
        .map_err(anyhow::Error::msg)
        .context("database hydration failed")?;
    Ok(state)
}

async fn serve(args: ServeArgs) -> anyhow::Result<u8> {
    let config = AppConfig {
        port: args.port,
        auth_token: args.auth_token.filter(|t| !t.is_empty()),
        database_url: args.database_url,
        overdue_sweep_secs: args.overdue_sweep_secs,
    };
    if config.auth_token.is_none() {
        tracing::warn!("no auth token configured, every request runs as the administrator");
    }
    let url = config.database_url.clone();
    let state = connect(url.as_deref(), config).await?;
    muni_api::serve(state).await.context("server stopped")?;
    Ok(0)
}

async fn migrate(args: DatabaseArgs) -> anyhow::Result<u8> {
    // init_pool applies the migrations on connect.
    let pool = muni_api::db::init_pool(Some(&args.database_url))
        .await
        .context("migration failed")?;
    if pool.is_none() {
        bail!("DATABASE_URL is empty");
    }
    println!("migrations applied");
    Ok(0)
}

async fn sweep_overdue(args: DatabaseArgs) -> anyhow::Result<u8> {
    let config = AppConfig {
        database_url: Some(args.database_url.clone()),
        ..AppConfig::default()
    };
    let state = connect(Some(&args.database_url), config).await?;
    if state.db_pool.is_none() {
        bail!("DATABASE_URL is empty");
    }
    let report = muni_api::commit::scoped(&state, muni_api::sweep::sweep_overdue(&state, Utc::now()))
        .await
        .context("overdue sweep failed")?;
    println!("fines moved to OVERDUE:  {}", report.fines);
    println!("levies moved to OVERDUE: {}", report.levies);
    Ok(0)
}

async fn audit_verify(args: VerifyArgs) -> anyhow::Result<u8> {
    let Some(pool) = muni_api::db::init_pool(Some(&args.database.database_url))
        .await
        .context("database initialization failed")?
    else {
        bail!("DATABASE_URL is empty");
    };
    let result = muni_api::db::audit::verify_chain_integrity(&pool, args.limit)
        .await
        .context("audit chain verification failed")?;
    println!("entries checked:  {}", result.total_events);
    println!("broken links:     {}", result.broken_links);
    println!("tampered entries: {}", result.tampered_entries);
    if result.chain_valid {
        println!("audit chain intact");
        Ok(0)
    } else {
        println!("audit chain BROKEN");
        Ok(2)
    }
}
