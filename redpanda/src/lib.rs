//! Redpanda message channel for warehouse sync.
//!
//! This crate provides [`RedpandaChannel`], the production implementation of
//! the [`MessageChannel`] trait from `warehouse-sync-core`. It uses rdkafka,
//! so any Kafka-compatible broker works (Redpanda, Apache Kafka, MSK, ...).
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Each [`Delivery`] carries an ack handle; its offset is committed only
//!   when the consumer calls [`Delivery::acknowledge`] after handling it
//! - A message that was buffered but never acknowledged (crash, store
//!   outage) is redelivered to the next subscription of the group
//! - Ordering is guaranteed within a partition; the message key selects the
//!   partition, so every message for one shipment stays in order
//!
//! # Publish Errors
//!
//! Broker errors are classified for the producer's retry loop:
//! - message too large, unknown topic, authorization failure →
//!   [`ChannelError::Rejected`] (never retried)
//! - delivery or request timeout → [`ChannelError::Timeout`]
//! - anything else → [`ChannelError::PublishFailed`]
//!
//! # Example
//!
//! ```no_run
//! use warehouse_sync_redpanda::RedpandaChannel;
//! use warehouse_sync_core::MessageChannel;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = RedpandaChannel::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("warehouse-sync")
//!     .build()?;
//!
//! channel.publish("SHIPMENT", "3f2a...", br#"{"id":"S-1","status":"PLANNED"}"#).await?;
//!
//! let mut stream = channel.subscribe(&["SHIPMENT", "SHIPMENT_SYNC"]).await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     println!("{delivery}");
//!     delivery.acknowledge();
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use warehouse_sync_core::channel::ChannelFuture;
use warehouse_sync_core::{AckHandle, ChannelError, Delivery, MessageChannel, MessageStream};

/// Redpanda-backed [`MessageChannel`].
///
/// One [`FutureProducer`] is shared by all publishes; every subscription
/// gets its own [`StreamConsumer`] driven by a background task.
///
/// # Example
///
/// ```no_run
/// use warehouse_sync_redpanda::RedpandaChannel;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = RedpandaChannel::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")  // Wait for all replicas
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaChannel {
    /// Kafka producer for publishing
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Delivery buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaChannel {
    /// Create a channel with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, ChannelError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the channel.
    #[must_use]
    pub fn builder() -> RedpandaChannelBuilder {
        RedpandaChannelBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaChannel`].
#[derive(Default)]
pub struct RedpandaChannelBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaChannelBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the per-attempt delivery timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is derived from the subscribed topics. Instances
    /// sharing a group split the partitions between them.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the delivery buffer size for subscriptions (default: 1000).
    ///
    /// A value of 0 is raised to 1.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set where new consumer groups start reading: `"earliest"`, `"latest"`
    /// or `"error"`.
    ///
    /// Default: `"earliest"`, so a fresh group reconciles the full topic.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaChannel`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    /// - Invalid configuration
    pub fn build(self) -> Result<RedpandaChannel, ChannelError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ChannelError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| ChannelError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            timeout_ms = timeout.as_millis(),
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("earliest"),
            "RedpandaChannel created"
        );

        Ok(RedpandaChannel {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

/// Map a producer error to a [`ChannelError`].
#[must_use]
pub fn classify_publish_error(topic: &str, error: &KafkaError) -> ChannelError {
    match error.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::InvalidTopic
            | RDKafkaErrorCode::TopicAuthorizationFailed,
        ) => ChannelError::Rejected {
            topic: topic.to_string(),
            reason: error.to_string(),
        },
        Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            ChannelError::Timeout {
                topic: topic.to_string(),
            }
        },
        _ => ChannelError::PublishFailed {
            topic: topic.to_string(),
            reason: error.to_string(),
        },
    }
}

fn consumer_group_for(topics: &[String]) -> String {
    // Sorted for deterministic group naming
    let mut sorted = topics.to_vec();
    sorted.sort();
    format!("warehouse-sync-{}", sorted.join("-"))
}

impl MessageChannel for RedpandaChannel {
    fn publish<'a>(&'a self, topic: &'a str, key: &'a str, payload: &'a [u8]) -> ChannelFuture<'a, ()> {
        Box::pin(async move {
            let record = FutureRecord::to(topic).payload(payload).key(key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic,
                        key,
                        partition,
                        offset,
                        "Message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    let error = classify_publish_error(topic, &kafka_error);
                    tracing::warn!(
                        topic,
                        key,
                        error = %kafka_error,
                        transient = error.is_transient(),
                        "Failed to publish message"
                    );
                    Err(error)
                },
            }
        })
    }

    fn subscribe<'a>(&'a self, topics: &'a [&'a str]) -> ChannelFuture<'a, MessageStream> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let consumer_group_id = self
                .consumer_group
                .clone()
                .unwrap_or_else(|| consumer_group_for(&topics));

            // Manual commit for at-least-once
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| ChannelError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| ChannelError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size = self.buffer_size,
                auto_offset_reset = %self.auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(self.buffer_size);
            let consumer = Arc::new(consumer);

            // The task owns the consumer and forwards deliveries; each
            // delivery's ack handle commits through the same consumer.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                loop {
                    let msg_result = tokio::select! {
                        () = tx.closed() => {
                            tracing::debug!("Receiver dropped, exiting consumer task");
                            break;
                        }
                        next = stream.next() => match next {
                            Some(msg_result) => msg_result,
                            None => break,
                        },
                    };

                    match msg_result {
                        Ok(message) => {
                            let topic = message.topic().to_string();
                            let partition = message.partition();
                            let offset = message.offset();
                            let committer = Arc::clone(&consumer);
                            let ack_topic = topic.clone();

                            let delivery = Delivery {
                                topic,
                                key: message
                                    .key()
                                    .map(|k| String::from_utf8_lossy(k).into_owned()),
                                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                                partition,
                                offset,
                                ack: AckHandle::new(move || {
                                    commit_offset(&committer, &ack_topic, partition, offset);
                                }),
                            };
                            tracing::trace!(%delivery, "Received message");

                            if tx.send(Ok(delivery)).await.is_err() {
                                tracing::debug!("Receiver dropped, exiting consumer task");
                                break;
                            }
                        },
                        Err(e) => {
                            let err = ChannelError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        },
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

/// Commit the position after `offset`, so the group resumes with the next
/// message of the partition.
fn commit_offset(consumer: &StreamConsumer, topic: &str, partition: i32, offset: i64) {
    let mut position = TopicPartitionList::new();
    let committed = position
        .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
        .and_then(|()| consumer.commit(&position, CommitMode::Async));

    match committed {
        Ok(()) => tracing::trace!(topic, partition, offset, "Offset committed"),
        Err(e) => tracing::warn!(
            topic,
            partition,
            offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_channel_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaChannel>();
        assert_sync::<RedpandaChannel>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaChannel::builder().build();
        assert!(matches!(result, Err(ChannelError::ConnectionFailed(_))));
    }

    #[test]
    fn oversized_and_unknown_topic_errors_are_permanent() {
        for code in [
            RDKafkaErrorCode::MessageSizeTooLarge,
            RDKafkaErrorCode::UnknownTopicOrPartition,
            RDKafkaErrorCode::TopicAuthorizationFailed,
        ] {
            let error = classify_publish_error("SHIPMENT", &KafkaError::MessageProduction(code));
            assert!(matches!(error, ChannelError::Rejected { .. }), "{code:?}");
            assert!(!error.is_transient());
        }
    }

    #[test]
    fn timeouts_and_broker_outages_are_transient() {
        let timeout = classify_publish_error(
            "SHIPMENT",
            &KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut),
        );
        assert_eq!(
            timeout,
            ChannelError::Timeout {
                topic: "SHIPMENT".to_string()
            }
        );

        let outage = classify_publish_error(
            "SHIPMENT",
            &KafkaError::MessageProduction(RDKafkaErrorCode::AllBrokersDown),
        );
        assert!(matches!(outage, ChannelError::PublishFailed { .. }));
        assert!(outage.is_transient());
    }

    #[test]
    fn derived_consumer_group_is_order_independent() {
        let a = consumer_group_for(&["SHIPMENT_SYNC".to_string(), "SHIPMENT".to_string()]);
        let b = consumer_group_for(&["SHIPMENT".to_string(), "SHIPMENT_SYNC".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a, "warehouse-sync-SHIPMENT-SHIPMENT_SYNC");
    }
}
