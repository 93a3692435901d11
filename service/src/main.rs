//! Shipment sync worker.
//!
//! Subscribes to the shipment topics, reconciles every delivery into
//! `PostgreSQL` and exposes Prometheus metrics until Ctrl+C or SIGTERM.

use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warehouse_sync_core::MessageChannel;
use warehouse_sync_postgres::{DeadLetterQueue, PostgresShipmentStore, migrate};
use warehouse_sync_redpanda::RedpandaChannel;
use warehouse_sync_runtime::{ShipmentConsumer, SyncWorker};
use warehouse_sync_service::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warehouse_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting warehouse sync worker");

    let config = Config::from_env();
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        consumer_group = %config.redpanda.consumer_group,
        topics = ?config.topics().shipment_topics(),
        "Configuration loaded"
    );

    let metrics_addr: SocketAddr = config.metrics_address().parse()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;
    info!(address = %metrics_addr, "Metrics exporter listening");

    info!("Connecting to PostgreSQL...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await?;
    migrate(&pool).await?;
    info!("PostgreSQL connected");

    info!("Connecting to Redpanda...");
    let channel: Arc<dyn MessageChannel> = Arc::new(
        RedpandaChannel::builder()
            .brokers(&config.redpanda.brokers)
            .producer_acks(&config.redpanda.producer_acks)
            .compression(&config.redpanda.compression)
            .timeout(config.broker_timeout())
            .consumer_group(&config.redpanda.consumer_group)
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .build()
            .map_err(|e| format!("Failed to create Redpanda channel: {e}"))?,
    );
    info!("Redpanda channel ready");

    let consumer = ShipmentConsumer::new(Arc::new(PostgresShipmentStore::from_pool(pool.clone())))
        .with_dead_letters(Arc::new(DeadLetterQueue::new(pool)))
        .with_store_retry(config.store_retry_policy());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = SyncWorker::new("shipment-sync", &config.topics(), channel, consumer, shutdown_rx)
        .with_retry_delay(config.resubscribe_delay())
        .spawn();

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(config.shutdown_timeout(), worker).await {
        Ok(Ok(())) => info!("Worker stopped"),
        Ok(Err(e)) => error!(error = %e, "Worker task failed"),
        Err(_) => warn!(
            timeout = ?config.shutdown_timeout(),
            "Worker did not stop within the shutdown timeout"
        ),
    }

    info!("Warehouse sync worker stopped");
    Ok(())
}

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
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
