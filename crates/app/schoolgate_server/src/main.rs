//! Schoolgate API server binary.
//!
//! Connects to PostgreSQL, applies migrations, wires the auth core to the
//! HTTP router and serves until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use schoolgate_core::auth::brute_force::BruteForceCounter;
use schoolgate_core::auth::{AuthConfig, AuthService};
use schoolgate_core::clock::{Clock, SystemClock};
use schoolgate_core::notify::TracingNotifier;
use schoolgate_core::store::postgres::PgStore;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "schoolgate_server", about = "Schoolgate API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/schoolgate"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    /// Seconds between sweeps of expired revocation entries.
    #[arg(long, env = "REVOCATION_SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    revocation_sweep_interval_secs: u64,

    /// Reverse proxies in front of the server that append to
    /// `X-Forwarded-For`. 0 ignores the header.
    #[arg(long, env = "TRUSTED_PROXY_HOPS", default_value_t = 0)]
    trusted_proxy_hops: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,schoolgate_api=debug,schoolgate_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    // Missing or equal secrets abort startup before anything else happens.
    let auth_config = AuthConfig::from_env()?;
    info!(config = ?auth_config, "loaded auth configuration");

    info!(max_connections = args.max_connections, "configuring connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    schoolgate_core::migrate::run_migrations(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(PgStore::new(pool));
    let brute_force = Arc::new(BruteForceCounter::new(auth_config.brute_force, clock.clone()));
    let auth = Arc::new(AuthService::new(
        &auth_config,
        store.clone(),
        store,
        brute_force.clone(),
        Arc::new(TracingNotifier),
        clock,
    )?);

    let sweep = auth
        .revocations()
        .spawn_sweep_task(Duration::from_secs(args.revocation_sweep_interval_secs.max(1)));
    let cleanup = brute_force.spawn_cleanup_task(Duration::from_secs(60));

    let config = schoolgate_api::config::ApiConfig {
        bind_addr: args.bind_addr,
        trusted_proxy_hops: args.trusted_proxy_hops,
    };
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;

    let app = schoolgate_api::router(schoolgate_api::AppState { auth, config });

    info!(addr = %local_addr, "REST API listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    sweep.abort();
    cleanup.abort();
    Ok(())
}
