//! Ready-made payloads for tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, TimeZone, Utc};
use warehouse_sync_core::{
    AckHandle, Delivery, Shipment, ShipmentLine, ShipmentStatus, Transaction, TransactionFlow,
};

/// Fixed timestamp for deterministic tests (2025-01-01 00:00:00 UTC).
#[must_use]
pub fn test_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// A fully populated shipment.
#[must_use]
pub fn full_shipment(id: &str, status: ShipmentStatus) -> Shipment {
    let mut shipment = Shipment::new(id, status);
    shipment.product_id = Some("P-42".to_string());
    shipment.quantity = Some(12);
    shipment.origin = Some("WH-NORTH".to_string());
    shipment.destination = Some("WH-SOUTH".to_string());
    shipment.lines = vec![ShipmentLine::new("SKU-1", 10), ShipmentLine::new("SKU-2", 2)];
    shipment
        .attributes
        .insert("carrier".to_string(), Some("acme".to_string()));
    shipment.updated_at = Some(test_timestamp());
    shipment
}

/// A transaction that passes validation.
#[must_use]
pub fn valid_transaction() -> Transaction {
    Transaction {
        id: None,
        purpose: Some("freight".to_string()),
        flow: Some(TransactionFlow::Outbound),
        amount: Some(12_500),
        currency: Some("EUR".to_string()),
        beneficiary: Some("Acme Logistics".to_string()),
        provider: Some("sepa".to_string()),
        created_at: Some(test_timestamp()),
    }
}

/// JSON encoding of `shipment`.
#[must_use]
pub fn payload(shipment: &Shipment) -> Vec<u8> {
    serde_json::to_vec(shipment).unwrap()
}

/// A delivery carrying raw `payload` on `topic`.
#[must_use]
pub fn raw_delivery(topic: &str, offset: i64, payload: &[u8]) -> Delivery {
    Delivery {
        topic: topic.to_string(),
        key: None,
        payload: payload.to_vec(),
        partition: 0,
        offset,
        ack: AckHandle::default(),
    }
}

/// A delivery carrying `shipment` on `topic`.
#[must_use]
pub fn delivery(topic: &str, offset: i64, shipment: &Shipment) -> Delivery {
    raw_delivery(topic, offset, &payload(shipment))
}
