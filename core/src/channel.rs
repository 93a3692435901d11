//! Message channel abstraction over the broker.
//!
//! This module provides the [`MessageChannel`] trait for publishing keyed
//! payloads to topics and subscribing to them. Shipment mutations flow from
//! the producer through the channel to the consumer, which reconciles them
//! into the store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ShipmentProducer │  validate → key → publish (retried)
//! └────────┬─────────┘
//!          │ (topic, key, JSON payload)
//!          ▼
//! ┌──────────────────┐
//! │  MessageChannel  │◄─── At-least-once, ordered per key
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ ShipmentConsumer │  deserialize → validate → reconcile
//! └────────┬─────────┘
//!          ▼
//!    ShipmentStore
//! ```
//!
//! # Key Principles
//!
//! - **Ordered per key**: deliveries sharing a key arrive in publish order
//! - **At-least-once delivery**: a delivery may be repeated; the broker
//!   advances past it only once the consumer calls [`Delivery::acknowledge`]
//! - **Keys are idempotency keys**: derived from the entity's natural id
//!
//! # Implementations
//!
//! - `InMemoryChannel` (in `warehouse-sync-testing`): recording test double
//! - `RedpandaChannel` (in `warehouse-sync-redpanda`): Kafka-compatible broker

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker refused or failed to accept a message
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// The broker did not acknowledge in time
    #[error("Publish to topic '{topic}' timed out")]
    Timeout {
        /// The topic that timed out
        topic: String,
    },

    /// The message can never be accepted as-is (too large, unknown topic, denied)
    #[error("Message rejected by topic '{topic}': {reason}")]
    Rejected {
        /// The rejecting topic
        topic: String,
        /// The reason for rejection
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl ChannelError {
    /// Returns `true` when retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed(_)
            | Self::PublishFailed { .. }
            | Self::Timeout { .. }
            | Self::TransportError(_) => true,
            Self::Rejected { .. } | Self::SubscriptionFailed { .. } => false,
        }
    }
}

/// Callback through which a consumer reports a delivery as processed.
///
/// Channels that track consumer progress attach one to every [`Delivery`]
/// they hand out, e.g. to commit the broker offset. The default handle does
/// nothing. Handles are ignored when deliveries are compared.
#[derive(Clone, Default)]
pub struct AckHandle(Option<Arc<dyn Fn() + Send + Sync>>);

impl AckHandle {
    /// Handle that runs `on_ack` on every acknowledgement.
    #[must_use]
    pub fn new(on_ack: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Some(Arc::new(on_ack)))
    }

    /// Run the callback, if any.
    pub fn acknowledge(&self) {
        if let Some(on_ack) = &self.0 {
            on_ack();
        }
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() { "AckHandle(tracked)" } else { "AckHandle(none)" })
    }
}

impl PartialEq for AckHandle {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for AckHandle {}

/// A message received from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the message was read from.
    pub topic: String,
    /// Message key, if the producer set one.
    pub key: Option<String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Broker partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Progress callback set by the channel.
    pub ack: AckHandle,
}

impl Delivery {
    /// Tell the channel this delivery is done with.
    ///
    /// Call it once the message was reconciled, rejected or dead-lettered.
    /// A delivery that is never acknowledged is delivered again after the
    /// next subscription.
    pub fn acknowledge(&self) {
        self.ack.acknowledge();
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delivery {{ topic: {}, partition: {}, offset: {}, size: {} bytes }}",
            self.topic,
            self.partition,
            self.offset,
            self.payload.len()
        )
    }
}

/// Stream of deliveries from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Delivery, ChannelError>> + Send>>;

/// Boxed future returned by channel operations.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChannelError>> + Send + 'a>>;

/// Broker client used by the producer and the sync worker.
///
/// Implementations must be safe for concurrent use by many producer calls and
/// must deliver messages sharing a key to a consumer in publish order.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the channel can be shared as
/// `Arc<dyn MessageChannel>`.
pub trait MessageChannel: Send + Sync {
    /// Publish `payload` to `topic` under `key`.
    ///
    /// A single call is a single attempt; retrying is the caller's concern.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`]; check [`ChannelError::is_transient`] to
    /// decide whether to retry.
    fn publish<'a>(&'a self, topic: &'a str, key: &'a str, payload: &'a [u8]) -> ChannelFuture<'a, ()>;

    /// Subscribe to one or more topics.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe<'a>(&'a self, topics: &'a [&'a str]) -> ChannelFuture<'a, MessageStream>;
}

/// Topic names used by the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    /// Full shipment upserts.
    pub shipment: String,
    /// Transaction records.
    pub transaction: String,
    /// Legacy synchronization-only shipment events.
    pub shipment_sync: String,
}

impl Topics {
    /// Topics the shipment consumer listens on.
    #[must_use]
    pub fn shipment_topics(&self) -> [&str; 2] {
        [self.shipment.as_str(), self.shipment_sync.as_str()]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            shipment: "SHIPMENT".to_string(),
            transaction: "TRANSACTION".to_string(),
            shipment_sync: "SHIPMENT_SYNC".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ChannelError::ConnectionFailed("down".into()).is_transient());
        assert!(ChannelError::Timeout { topic: "SHIPMENT".into() }.is_transient());
        assert!(
            ChannelError::PublishFailed {
                topic: "SHIPMENT".into(),
                reason: "broker overloaded".into()
            }
            .is_transient()
        );
        assert!(
            !ChannelError::Rejected {
                topic: "SHIPMENT".into(),
                reason: "message too large".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn default_topics() {
        let topics = Topics::default();
        assert_eq!(topics.shipment, "SHIPMENT");
        assert_eq!(topics.transaction, "TRANSACTION");
        assert_eq!(topics.shipment_topics(), ["SHIPMENT", "SHIPMENT_SYNC"]);
    }

    #[test]
    fn delivery_display() {
        let delivery = Delivery {
            topic: "SHIPMENT".into(),
            key: None,
            payload: vec![1, 2, 3],
            partition: 2,
            offset: 41,
            ack: AckHandle::default(),
        };
        let shown = delivery.to_string();
        assert!(shown.contains("SHIPMENT"));
        assert!(shown.contains("3 bytes"));
    }

    #[test]
    fn acknowledge_runs_the_attached_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let acks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&acks);
        let tracked = Delivery {
            topic: "SHIPMENT".into(),
            key: Some("k".into()),
            payload: b"{}".to_vec(),
            partition: 0,
            offset: 7,
            ack: AckHandle::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        };
        let untracked = Delivery {
            ack: AckHandle::default(),
            ..tracked.clone()
        };

        untracked.acknowledge();
        assert_eq!(acks.load(Ordering::SeqCst), 0);
        tracked.clone().acknowledge();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(tracked, untracked);
    }
}
