//! # Warehouse Sync Runtime
//!
//! The moving parts of the shipment synchronization pipeline:
//!
//! - [`producer::ShipmentProducer`]: validate, key and publish with retry
//! - [`consumer::ShipmentConsumer`]: deserialize, validate and reconcile
//! - [`worker::SyncWorker`]: keeps a consumer subscribed until shutdown
//! - [`retry`]: the backoff wrapper around publishing and store access
//!
//! ## Example
//!
//! ```rust,ignore
//! use warehouse_sync_runtime::{ShipmentConsumer, ShipmentProducer};
//!
//! let producer = ShipmentProducer::new(channel.clone());
//! producer.produce(&Shipment::new("S-100", ShipmentStatus::Planned)).await?;
//!
//! let consumer = ShipmentConsumer::new(store).with_dead_letters(dlq);
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let handle = SyncWorker::new("shipments", &Topics::default(), channel, consumer, shutdown_rx).spawn();
//! ```

pub mod consumer;
pub mod producer;
pub mod retry;
pub mod worker;

pub use consumer::{ConsumeError, ConsumeSummary, Reconciliation, ShipmentConsumer};
pub use producer::{ProduceError, ShipmentProducer};
pub use retry::{RetryError, RetryPolicy};
pub use worker::SyncWorker;
