//! # Warehouse Sync Testing
//!
//! Test doubles for the shipment synchronization pipeline.
//!
//! This crate provides:
//! - [`InMemoryChannel`]: a recording broker with scripted failures
//! - [`InMemoryShipmentStore`] and [`InMemoryDeadLetters`]
//! - [`fixtures`]: ready-made shipments, transactions and deliveries
//! - [`properties`]: proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use warehouse_sync_testing::{InMemoryChannel, InMemoryShipmentStore};
//!
//! #[tokio::test]
//! async fn test_produce_then_consume() {
//!     let channel = Arc::new(InMemoryChannel::new());
//!     let store = Arc::new(InMemoryShipmentStore::new());
//!
//!     let producer = ShipmentProducer::new(channel.clone());
//!     producer.produce(&Shipment::new("S-1", ShipmentStatus::Planned)).await.unwrap();
//!
//!     let consumer = ShipmentConsumer::new(store.clone());
//!     for delivery in channel.published() {
//!         consumer.consume(&delivery.payload).await.unwrap();
//!     }
//!     assert_eq!(store.len(), 1);
//! }
//! ```

pub mod channel;
pub mod fixtures;
pub mod store;

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use warehouse_sync_core::ShipmentStatus;

    /// Any shipment status.
    pub fn any_status() -> impl Strategy<Value = ShipmentStatus> {
        proptest::sample::select(ShipmentStatus::ALL.to_vec())
    }

    /// Shipment ids that pass validation.
    pub fn shipment_id() -> impl Strategy<Value = String> {
        "S-[A-Z0-9]{1,20}"
    }
}

// Re-export commonly used items
pub use channel::{InMemoryChannel, PublishAttempt};
pub use fixtures::test_timestamp;
pub use store::{InMemoryDeadLetters, InMemoryShipmentStore};
