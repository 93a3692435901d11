//! Validated, keyed, retried publishing of shipments and transactions.
//!
//! Every `produce*` call runs the same pipeline:
//!
//! 1. validate the fields the topic needs (never retried)
//! 2. derive the message key
//! 3. serialize to JSON
//! 4. publish under the [`RetryPolicy`], retrying transient channel errors
//!
//! The producer holds no state between calls; clones share the channel.

use crate::retry::{RetryError, RetryPolicy, retry_with_predicate};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use warehouse_sync_core::{
    ChannelError, FieldCheckError, FieldValidator, KeyGenerator, MessageChannel, MessageKey,
    Shipment, Topics, Transaction, ValidationError,
};

/// Fields a transaction must carry before it is published.
pub const TRANSACTION_REQUIRED_FIELDS: [&str; 6] =
    ["purpose", "flow", "amount", "currency", "beneficiary", "provider"];

/// Fields a legacy sync event must carry before it is published.
pub const SYNC_REQUIRED_FIELDS: [&str; 2] = ["id", "status"];

/// Errors returned by [`ShipmentProducer`].
#[derive(Error, Debug)]
pub enum ProduceError {
    /// The payload failed validation; nothing was published.
    #[error(transparent)]
    Validation(#[from] FieldCheckError),

    /// The payload could not be encoded.
    #[error("Failed to serialize payload: {0}")]
    Serialization(String),

    /// The broker refused the message for a reason retrying cannot fix.
    #[error("Publish to '{topic}' rejected after {attempts} attempt(s): {error}")]
    Rejected {
        /// Target topic.
        topic: String,
        /// Key of the refused message.
        key: MessageKey,
        /// Attempts made, the refusing one included.
        attempts: usize,
        /// The permanent channel error.
        #[source]
        error: ChannelError,
    },

    /// Every attempt failed transiently.
    #[error("Publish to '{topic}' failed after {attempts} attempts: {last_error}")]
    PublishExhausted {
        /// Target topic.
        topic: String,
        /// Key of the undelivered message.
        key: MessageKey,
        /// Attempts made.
        attempts: usize,
        /// Error of the final attempt.
        #[source]
        last_error: ChannelError,
    },
}

impl ProduceError {
    /// Returns `true` if the payload itself was invalid.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<ValidationError> for ProduceError {
    fn from(error: ValidationError) -> Self {
        Self::Validation(error.into())
    }
}

/// Publishes shipment mutations and transaction records.
///
/// # Example
///
/// ```rust,ignore
/// let producer = ShipmentProducer::new(channel)
///     .with_retry_policy(RetryPolicy::default());
///
/// let key = producer.produce(&Shipment::new("S-100", ShipmentStatus::Planned)).await?;
/// ```
#[derive(Clone)]
pub struct ShipmentProducer {
    channel: Arc<dyn MessageChannel>,
    keys: KeyGenerator,
    topics: Topics,
    policy: RetryPolicy,
}

impl ShipmentProducer {
    /// Create a producer with default topics and the default retry policy.
    #[must_use]
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            channel,
            keys: KeyGenerator::new(),
            topics: Topics::default(),
            policy: RetryPolicy::default(),
        }
    }

    /// Override topic names.
    #[must_use]
    pub fn with_topics(mut self, topics: Topics) -> Self {
        self.topics = topics;
        self
    }

    /// Override the publish retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The retry policy applied to every publish.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Publish a full shipment upsert.
    ///
    /// The key is derived from the shipment id, so every mutation of one
    /// shipment lands on the same partition.
    ///
    /// # Errors
    ///
    /// - [`ProduceError::Validation`] if the id is missing or malformed
    /// - [`ProduceError::Rejected`] on a permanent channel error
    /// - [`ProduceError::PublishExhausted`] once the attempts run out
    pub async fn produce(&self, shipment: &Shipment) -> Result<MessageKey, ProduceError> {
        FieldValidator::validate_required(shipment, "id", true)?;
        let key = self.shipment_key(shipment)?;
        let payload = encode(shipment)?;

        self.publish(&self.topics.shipment, key, &payload).await
    }

    /// Publish a synchronization-only shipment event to the legacy topic.
    ///
    /// # Errors
    ///
    /// As [`ShipmentProducer::produce`]; `status` is required as well.
    pub async fn produce_sync(&self, shipment: &Shipment) -> Result<MessageKey, ProduceError> {
        FieldValidator::validate_required_many(shipment, true, &SYNC_REQUIRED_FIELDS)?;
        let key = self.shipment_key(shipment)?;
        let payload = encode(shipment)?;

        self.publish(&self.topics.shipment_sync, key, &payload).await
    }

    /// Publish an append-only transaction record under a random key.
    ///
    /// # Errors
    ///
    /// - [`ProduceError::Validation`] if any of [`TRANSACTION_REQUIRED_FIELDS`]
    ///   is missing or malformed
    /// - [`ProduceError::Rejected`] / [`ProduceError::PublishExhausted`] as
    ///   for [`ShipmentProducer::produce`]
    pub async fn produce_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<MessageKey, ProduceError> {
        FieldValidator::validate_required_many(transaction, true, &TRANSACTION_REQUIRED_FIELDS)?;
        let key = self.keys.random();
        let payload = encode(transaction)?;

        self.publish(&self.topics.transaction, key, &payload).await
    }

    fn shipment_key(&self, shipment: &Shipment) -> Result<MessageKey, ProduceError> {
        match shipment.id.as_deref() {
            Some(id) => Ok(self.keys.generate(id)),
            None => Err(ValidationError::new("id", "is required").into()),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        key: MessageKey,
        payload: &[u8],
    ) -> Result<MessageKey, ProduceError> {
        let channel: &dyn MessageChannel = self.channel.as_ref();
        let key_str = key.as_str();
        let calls = AtomicU64::new(0);
        let calls_ref = &calls;

        let result = retry_with_predicate(
            &self.policy,
            move || {
                calls_ref.fetch_add(1, Ordering::Relaxed);
                channel.publish(topic, key_str, payload)
            },
            ChannelError::is_transient,
        )
        .await;

        let retries = calls.load(Ordering::Relaxed).saturating_sub(1);
        if retries > 0 {
            metrics::counter!("shipment_sync.publish_retries", "topic" => topic.to_string())
                .increment(retries);
        }

        match result {
            Ok(()) => {
                metrics::counter!("shipment_sync.published", "topic" => topic.to_string())
                    .increment(1);
                tracing::debug!(topic, key = %key, bytes = payload.len(), "Message published");
                Ok(key)
            },
            Err(RetryError::Aborted { attempt, error }) => {
                metrics::counter!("shipment_sync.publish_failed", "topic" => topic.to_string())
                    .increment(1);
                tracing::error!(topic, key = %key, attempt, error = %error, "Publish rejected");
                Err(ProduceError::Rejected {
                    topic: topic.to_string(),
                    key,
                    attempts: attempt,
                    error,
                })
            },
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => {
                metrics::counter!("shipment_sync.publish_failed", "topic" => topic.to_string())
                    .increment(1);
                tracing::error!(
                    topic,
                    key = %key,
                    attempts,
                    error = %last_error,
                    "Publish attempts exhausted"
                );
                Err(ProduceError::PublishExhausted {
                    topic: topic.to_string(),
                    key,
                    attempts,
                    last_error,
                })
            },
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ProduceError> {
    serde_json::to_vec(value).map_err(|e| ProduceError::Serialization(e.to_string()))
}
