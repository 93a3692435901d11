//! Deserialization, re-validation and reconciliation of shipment messages.
//!
//! [`ShipmentConsumer::consume`] handles a single payload. [`ShipmentConsumer::run`]
//! drains a subscription, sorting failures into business rejections (logged,
//! skipped) and poison messages (logged, dead-lettered). Neither kind stops
//! the loop, and both are acknowledged.
//!
//! A store outage is not the message's fault. The delivery is retried under
//! the store retry policy; if the store stays down the run stops without
//! acknowledging it, so the next subscription receives it again.

use crate::retry::{RetryError, RetryPolicy, retry_with_predicate};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use warehouse_sync_core::{
    DeadLetter, DeadLetterReason, DeadLetterSink, Delivery, FieldCheckError, FieldValidator,
    MessageStream, Shipment, ShipmentStatus, ShipmentStore, StoreError, ValidationError,
    can_transition,
};

/// Fields every consumed shipment must carry.
pub const CONSUMED_REQUIRED_FIELDS: [&str; 2] = ["id", "status"];

/// Errors returned by [`ShipmentConsumer::consume`].
#[derive(Error, Debug)]
pub enum ConsumeError {
    /// The payload is not a shipment document.
    #[error("Failed to deserialize shipment: {0}")]
    Deserialization(String),

    /// The shipment parsed but failed validation.
    #[error(transparent)]
    Validation(#[from] FieldCheckError),

    /// The incoming status may not follow the stored one.
    #[error("Illegal transition for shipment '{id}': {from} -> {to}")]
    StateTransition {
        /// Shipment id.
        id: String,
        /// Stored status.
        from: ShipmentStatus,
        /// Rejected incoming status.
        to: ShipmentStatus,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConsumeError {
    /// Dead-letter category, or `None` for business rejections and
    /// transient store failures.
    #[must_use]
    pub const fn dead_letter_reason(&self) -> Option<DeadLetterReason> {
        match self {
            Self::Deserialization(_) => Some(DeadLetterReason::Deserialization),
            Self::Validation(_) => Some(DeadLetterReason::Validation),
            Self::Store(error) if error.is_transient() => None,
            Self::Store(_) => Some(DeadLetterReason::Store),
            Self::StateTransition { .. } => None,
        }
    }

    /// Whether the same delivery may succeed once the store recovers.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(error) => error.is_transient(),
            _ => false,
        }
    }
}

impl From<ValidationError> for ConsumeError {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error.into())
    }
}

/// What a successful reconciliation did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// First sighting of the shipment; stored unconditionally.
    Created {
        /// Shipment id.
        id: String,
        /// Status as stored.
        status: ShipmentStatus,
    },
    /// An existing shipment was updated.
    Updated {
        /// Shipment id.
        id: String,
        /// Previous status, if the stored record had one.
        from: Option<ShipmentStatus>,
        /// New status.
        to: ShipmentStatus,
    },
}

impl Reconciliation {
    /// Id of the reconciled shipment.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Created { id, .. } | Self::Updated { id, .. } => id,
        }
    }
}

/// Counters for one [`ShipmentConsumer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// Messages reconciled into the store.
    pub reconciled: u64,
    /// Messages dropped as illegal transitions.
    pub rejected: u64,
    /// Poison messages handed to the dead-letter sink.
    pub dead_lettered: u64,
    /// Errors reported by the stream itself.
    pub transport_errors: u64,
    /// Whether the run ended on a shutdown signal rather than end of stream.
    pub shutdown_requested: bool,
    /// Whether the run stopped because the store stayed unavailable. The
    /// delivery it stopped on was not acknowledged.
    pub store_unavailable: bool,
}

impl ConsumeSummary {
    /// Total deliveries handled.
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.reconciled + self.rejected + self.dead_lettered
    }

    fn record(&mut self, outcome: &Result<Reconciliation, ConsumeError>) {
        match outcome {
            Ok(_) => self.reconciled += 1,
            Err(ConsumeError::StateTransition { .. }) => self.rejected += 1,
            Err(_) => self.dead_lettered += 1,
        }
    }
}

/// Applies shipment messages to a [`ShipmentStore`].
///
/// Holds no per-message state, so one consumer may serve concurrent calls for
/// different shipments. Calls for the same shipment must be serialized by the
/// caller; the broker's per-key ordering provides this.
#[derive(Clone)]
pub struct ShipmentConsumer {
    store: Arc<dyn ShipmentStore>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    store_retry: RetryPolicy,
}

impl ShipmentConsumer {
    /// Create a consumer without a dead-letter sink; poison messages are only logged.
    #[must_use]
    pub fn new(store: Arc<dyn ShipmentStore>) -> Self {
        Self {
            store,
            dead_letters: None,
            store_retry: RetryPolicy::default(),
        }
    }

    /// Record poison messages in `sink`.
    #[must_use]
    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Retry deliveries that hit a transient store error under `policy`.
    #[must_use]
    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    /// Retry policy for transient store errors.
    #[must_use]
    pub const fn store_retry(&self) -> &RetryPolicy {
        &self.store_retry
    }

    /// Deserialize, validate and reconcile one raw payload.
    ///
    /// Makes a single attempt; [`ShipmentConsumer::handle`] adds the store
    /// retry.
    ///
    /// # Errors
    ///
    /// - [`ConsumeError::Deserialization`] for malformed JSON
    /// - [`ConsumeError::Validation`] if `id` or `status` is missing, or a
    ///   present field breaks its constraints
    /// - [`ConsumeError::StateTransition`] for an illegal status change
    /// - [`ConsumeError::Store`] if the store fails
    pub async fn consume(&self, raw: &[u8]) -> Result<Reconciliation, ConsumeError> {
        let shipment: Shipment = serde_json::from_slice(raw)
            .map_err(|e| ConsumeError::Deserialization(e.to_string()))?;

        FieldValidator::validate_required_many(&shipment, true, &CONSUMED_REQUIRED_FIELDS)?;
        FieldValidator::validate_declared(&shipment)?;

        self.reconcile(shipment).await
    }

    /// Apply an already validated shipment to the store.
    ///
    /// An unknown id is stored as-is. A known id is updated only if the
    /// stored status may transition to the incoming one; otherwise the store
    /// is left untouched.
    ///
    /// # Errors
    ///
    /// See [`ShipmentConsumer::consume`].
    pub async fn reconcile(&self, incoming: Shipment) -> Result<Reconciliation, ConsumeError> {
        let Some(id) = incoming.id.clone() else {
            return Err(ValidationError::new("id", "is required").into());
        };
        let Some(target) = incoming.status else {
            return Err(ValidationError::new("status", "is required").into());
        };

        let Some(mut existing) = self.store.find_by_id(&id).await? else {
            self.store.upsert(&incoming).await?;
            tracing::debug!(id = %id, status = %target, "Initial shipment sync");
            return Ok(Reconciliation::Created { id, status: target });
        };

        let from = existing.status;
        match from {
            Some(current) if !can_transition(current, target) => {
                return Err(ConsumeError::StateTransition {
                    id,
                    from: current,
                    to: target,
                });
            },
            _ => {},
        }

        existing.apply(incoming);
        self.store.upsert(&existing).await?;
        tracing::debug!(id = %id, from = ?from, to = %target, "Shipment updated");

        Ok(Reconciliation::Updated {
            id,
            from,
            to: target,
        })
    }

    /// Consume one delivery, logging the outcome and dead-lettering poison messages.
    ///
    /// A transient store error retries the whole delivery under the store
    /// retry policy. The delivery is not acknowledged here;
    /// [`ShipmentConsumer::run`] does that.
    ///
    /// # Errors
    ///
    /// The [`ConsumeError`] from [`ShipmentConsumer::consume`], after it has
    /// been logged and, for poison messages, dead-lettered. A transient store
    /// error is returned once the retries are used up and is never
    /// dead-lettered.
    pub async fn handle(&self, delivery: &Delivery) -> Result<Reconciliation, ConsumeError> {
        let outcome = retry_with_predicate(
            &self.store_retry,
            || self.consume(&delivery.payload),
            ConsumeError::is_transient,
        )
        .await
        .map_err(RetryError::into_inner);

        match &outcome {
            Ok(reconciliation) => {
                metrics::counter!("shipment_sync.reconciled", "topic" => delivery.topic.clone())
                    .increment(1);
                tracing::debug!(id = reconciliation.id(), %delivery, "Delivery reconciled");
            },
            Err(error @ ConsumeError::StateTransition { .. }) => {
                metrics::counter!("shipment_sync.rejected", "topic" => delivery.topic.clone())
                    .increment(1);
                tracing::warn!(error = %error, %delivery, "Rejected shipment update");
            },
            Err(error) if error.is_transient() => {
                metrics::counter!("shipment_sync.store_unavailable", "topic" => delivery.topic.clone())
                    .increment(1);
                tracing::error!(
                    error = %error,
                    %delivery,
                    attempts = self.store_retry.attempts(),
                    "Store unavailable"
                );
            },
            Err(error) => {
                tracing::error!(error = %error, %delivery, "Poison message");
                if let Some(reason) = error.dead_letter_reason() {
                    self.dead_letter(delivery, reason, error).await;
                }
            },
        }

        outcome
    }

    /// Drain `stream` until it ends, `shutdown` fires or the store stays
    /// unavailable.
    ///
    /// Every handled delivery is acknowledged: reconciled, rejected and
    /// dead-lettered alike. A delivery that still fails on the store after
    /// its retries is not; the run stops on it with
    /// [`ConsumeSummary::store_unavailable`] set. A closed or lagged shutdown
    /// channel counts as a shutdown signal.
    pub async fn run(
        &self,
        mut stream: MessageStream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> ConsumeSummary {
        let mut summary = ConsumeSummary::default();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Consumer received shutdown signal");
                    summary.shutdown_requested = true;
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        let outcome = self.handle(&delivery).await;
                        if matches!(&outcome, Err(error) if error.is_transient()) {
                            tracing::warn!(%delivery, "Stopping before the delivery is acknowledged");
                            summary.store_unavailable = true;
                            break;
                        }
                        delivery.acknowledge();
                        summary.record(&outcome);
                    }
                    Some(Err(error)) => {
                        summary.transport_errors += 1;
                        tracing::error!(error = %error, "Error receiving from stream");
                    }
                    None => {
                        tracing::warn!("Message stream ended");
                        break;
                    }
                }
            }
        }

        summary
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: DeadLetterReason, error: &ConsumeError) {
        metrics::counter!("shipment_sync.dead_lettered", "reason" => reason.as_str())
            .increment(1);

        let Some(sink) = &self.dead_letters else {
            return;
        };

        let letter = DeadLetter {
            delivery: delivery.clone(),
            reason,
            error_message: error.to_string(),
            failed_at: Utc::now(),
        };

        if let Err(e) = sink.record(&letter).await {
            tracing::error!(error = %e, %delivery, "Failed to record dead letter");
        }
    }
}
