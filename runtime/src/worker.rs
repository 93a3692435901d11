//! Background task that keeps a [`ShipmentConsumer`] subscribed.
//!
//! ```text
//! loop {
//!     subscribe(topics)
//!         ok  → consumer.run(stream) until stream ends, store outage or shutdown
//!         err → log
//!     wait retry_delay (or exit on shutdown)
//! }
//! ```

use crate::consumer::ShipmentConsumer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use warehouse_sync_core::{MessageChannel, Topics};

/// Default wait before resubscribing.
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Subscribe-consume-resubscribe loop for shipment topics.
///
/// Runs until the shutdown channel fires (or closes). Subscription failures,
/// stream ends and store outages are retried after `retry_delay`; after an
/// outage the fresh subscription redelivers the unacknowledged message.
pub struct SyncWorker {
    name: String,
    topics: Vec<String>,
    channel: Arc<dyn MessageChannel>,
    consumer: ShipmentConsumer,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl SyncWorker {
    /// Create a worker for the shipment and legacy sync topics.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: &Topics,
        channel: Arc<dyn MessageChannel>,
        consumer: ShipmentConsumer,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics: topics
                .shipment_topics()
                .iter()
                .map(ToString::to_string)
                .collect(),
            channel,
            consumer,
            shutdown,
            retry_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    /// Set the wait before resubscribing.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Topics the worker subscribes to.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the loop on the current task until shutdown.
    pub async fn run(&mut self) {
        info!(worker = %self.name, topics = ?self.topics, "Sync worker started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.channel.subscribe(&topics) => result,
            };

            match subscribed {
                Ok(stream) => {
                    info!(worker = %self.name, topics = ?self.topics, "Subscribed");
                    let summary = self.consumer.run(stream, &mut self.shutdown).await;
                    info!(
                        worker = %self.name,
                        reconciled = summary.reconciled,
                        rejected = summary.rejected,
                        dead_lettered = summary.dead_lettered,
                        transport_errors = summary.transport_errors,
                        "Consumer run finished"
                    );
                    if summary.shutdown_requested {
                        break;
                    }
                    if summary.store_unavailable {
                        warn!(
                            worker = %self.name,
                            "Store unavailable, resubscribing in {:?}",
                            self.retry_delay
                        );
                    } else {
                        warn!(
                            worker = %self.name,
                            "Stream ended, resubscribing in {:?}",
                            self.retry_delay
                        );
                    }
                },
                Err(e) => {
                    error!(
                        worker = %self.name,
                        error = %e,
                        "Failed to subscribe, retrying in {:?}",
                        self.retry_delay
                    );
                },
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {},
            }
        }

        info!(worker = %self.name, "Sync worker stopped");
    }
}
