//! hookrelay outbound webhook delivery service.
//!
//! Main entry point. Loads configuration, connects to Postgres, starts the
//! delivery engine and serves the administrative API until shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookrelay_api::{AppState, Config};
use hookrelay_core::{storage::Storage, Clock, RealClock};
use hookrelay_delivery::{PostgresWebhookStorage, WebhookEngine};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.rust_log)?;

    info!("Starting hookrelay webhook delivery service");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        workers = config.worker_pool_size,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    let storage = Storage::new(db_pool.clone());
    storage.migrate().await.context("Failed to apply database schema")?;
    info!("Database schema ready");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let engine = Arc::new(
        WebhookEngine::new(
            Arc::new(PostgresWebhookStorage::new(Arc::new(storage))),
            config.to_delivery_config(),
            clock.clone(),
        )
        .context("Failed to build delivery engine")?,
    );
    engine.start().await.context("Failed to start delivery engine")?;

    let addr = config.parse_server_addr()?;
    let request_timeout = Duration::from_secs(config.request_timeout);
    info!(addr = %addr, "hookrelay is ready to accept events");

    if let Err(e) =
        hookrelay_api::start_server(AppState::new(engine.clone(), clock), addr, request_timeout).await
    {
        error!(error = %e, "Server failed");
    }

    if let Err(e) = engine.shutdown().await {
        warn!(error = %e, "Delivery engine did not shut down cleanly");
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("hookrelay shutdown complete");
    Ok(())
}

/// Initializes tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
