//! Integration tests for [`RedpandaChannel`] against a real Kafka broker.
//!
//! These tests are marked as `#[ignore]` by default because they require
//! Docker (for testcontainers) and take 15-60 seconds to start Kafka.
//!
//! To run explicitly:
//! ```bash
//! cargo test -p warehouse-sync-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use warehouse_sync_core::{MessageChannel, Shipment, ShipmentStatus};
use warehouse_sync_redpanda::RedpandaChannel;
use warehouse_sync_runtime::{ShipmentConsumer, ShipmentProducer};
use warehouse_sync_testing::InMemoryShipmentStore;

/// Start Kafka and return the container with its broker address.
async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Publish until the topic exists and accepts writes.
async fn ensure_topic_exists(channel: &RedpandaChannel, topic: &str) {
    for attempt in 1..=60 {
        if channel.publish(topic, "warmup", b"{}").await.is_ok() {
            // Wait for topic metadata to propagate
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

#[tokio::test]
#[ignore]
async fn test_keyed_publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let channel = RedpandaChannel::builder()
        .brokers(&brokers)
        .consumer_group("round-trip")
        .build()
        .expect("Failed to create channel");
    ensure_topic_exists(&channel, "SHIPMENT").await;

    let mut stream = channel
        .subscribe(&["SHIPMENT"])
        .await
        .expect("Failed to subscribe");

    channel
        .publish("SHIPMENT", "key-1", br#"{"id":"S-1","status":"PLANNED"}"#)
        .await
        .expect("Failed to publish");

    let delivery = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let delivery = stream.next().await.expect("stream ended").expect("receive failed");
            if delivery.key.as_deref() == Some("key-1") {
                return delivery;
            }
        }
    })
    .await
    .expect("Timeout waiting for message");

    assert_eq!(delivery.topic, "SHIPMENT");
    assert_eq!(delivery.payload, br#"{"id":"S-1","status":"PLANNED"}"#);
}

#[tokio::test]
#[ignore]
async fn test_producer_to_consumer_through_kafka() {
    let (_kafka, brokers) = start_kafka().await;
    let channel = Arc::new(
        RedpandaChannel::builder()
            .brokers(&brokers)
            .consumer_group("pipeline")
            .build()
            .expect("Failed to create channel"),
    );
    ensure_topic_exists(&channel, "SHIPMENT").await;

    let producer = ShipmentProducer::new(channel.clone());
    producer
        .produce(&Shipment::new("S-100", ShipmentStatus::Planned))
        .await
        .expect("Failed to produce");
    producer
        .produce(&Shipment::new("S-100", ShipmentStatus::Sent))
        .await
        .expect("Failed to produce");

    let store = InMemoryShipmentStore::new();
    let consumer = ShipmentConsumer::new(Arc::new(store.clone()));
    let mut stream = channel.subscribe(&["SHIPMENT"]).await.expect("Failed to subscribe");

    tokio::time::timeout(Duration::from_secs(30), async {
        while store.status_of("S-100") != Some(ShipmentStatus::Sent) {
            let delivery = stream.next().await.expect("stream ended").expect("receive failed");
            if delivery.key.as_deref() == Some("warmup") {
                continue;
            }
            consumer.consume(&delivery.payload).await.expect("consume failed");
        }
    })
    .await
    .expect("Timeout waiting for reconciliation");
}

#[tokio::test]
#[ignore]
async fn test_unacknowledged_delivery_is_redelivered_to_next_subscription() {
    let (_kafka, brokers) = start_kafka().await;
    let channel = RedpandaChannel::builder()
        .brokers(&brokers)
        .consumer_group("redelivery")
        .build()
        .expect("Failed to create channel");
    ensure_topic_exists(&channel, "SHIPMENT").await;

    channel
        .publish("SHIPMENT", "key-a", br#"{"id":"S-1","status":"PLANNED"}"#)
        .await
        .expect("Failed to publish");
    channel
        .publish("SHIPMENT", "key-b", br#"{"id":"S-1","status":"SENT"}"#)
        .await
        .expect("Failed to publish");

    // Acknowledge everything up to key-a, then stop on key-b without acknowledging it.
    let mut first = channel.subscribe(&["SHIPMENT"]).await.expect("Failed to subscribe");
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let delivery = first.next().await.expect("stream ended").expect("receive failed");
            if delivery.key.as_deref() == Some("key-b") {
                return;
            }
            delivery.acknowledge();
        }
    })
    .await
    .expect("Timeout waiting for key-b");
    tokio::time::sleep(Duration::from_secs(2)).await;
    drop(first);

    let mut second = channel.subscribe(&["SHIPMENT"]).await.expect("Failed to resubscribe");
    let redelivered = tokio::time::timeout(Duration::from_secs(30), async {
        second.next().await.expect("stream ended").expect("receive failed")
    })
    .await
    .expect("Timeout waiting for redelivery");

    assert_eq!(redelivered.key.as_deref(), Some("key-b"));
}
