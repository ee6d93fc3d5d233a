use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_service::config::Config;
use telemetry_service::consumers::{TelemetryConsumer, TelemetryPipeline};
use telemetry_service::repository::{PostgresEntityResolver, PostgresPositionStore};
use tokio::signal;
use tracing::{error, info};

const DEFAULT_LOG_FILTER: &str = "telemetry_service=info,db_pool=info,info";

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting Telemetry Service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        brokers = %config.kafka.brokers,
        topics = ?config.kafka.topics,
        group_id = %config.kafka.group_id,
        "Configuration loaded"
    );

    config.database.log_config();
    let pool = db_pool::create_pool(config.database.clone())
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let pipeline = TelemetryPipeline::new(
        Arc::new(PostgresEntityResolver::new(pool.clone())),
        Arc::new(PostgresPositionStore::new(pool.clone())),
        config.ingest.store_timeout,
    );

    let mut consumer = TelemetryConsumer::new(config.kafka, config.ingest, pipeline);
    consumer
        .start()
        .await
        .context("Failed to start telemetry consumer")?;

    shutdown_signal().await;

    match consumer.stop().await {
        Some(stats) => info!(
            received = stats.received,
            stored = stats.stored,
            discarded = stats.discarded(),
            entities_created = stats.entities_created,
            "Telemetry consumer drained"
        ),
        None => info!("Telemetry consumer was not running"),
    }

    pool.close().await;
    info!("Telemetry service shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }

    info!("Shutting down gracefully...");
}
