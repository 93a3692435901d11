//! In-memory [`ShipmentStore`] and [`DeadLetterSink`].
//!
//! - [`InMemoryShipmentStore`]: `BTreeMap`-backed shipment storage
//! - [`InMemoryDeadLetters`]: collects dead letters for assertions

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use warehouse_sync_core::store::StoreFuture;
use warehouse_sync_core::{
    DeadLetter, DeadLetterReason, DeadLetterSink, Shipment, ShipmentStore, StoreError,
};

/// In-memory shipment store for fast, deterministic tests.
///
/// Read-your-writes consistent. Failures can be scripted with
/// [`InMemoryShipmentStore::fail_next`]; each scripted error is returned by
/// the next operation, lookup or write.
///
/// # Example
///
/// ```
/// use warehouse_sync_testing::InMemoryShipmentStore;
/// use warehouse_sync_core::{Shipment, ShipmentStatus, ShipmentStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryShipmentStore::new();
/// store.upsert(&Shipment::new("S-1", ShipmentStatus::Planned)).await?;
///
/// assert_eq!(store.status_of("S-1"), Some(ShipmentStatus::Planned));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryShipmentStore {
    shipments: Arc<RwLock<BTreeMap<String, Shipment>>>,
    failures: Arc<Mutex<VecDeque<StoreError>>>,
    writes: Arc<Mutex<usize>>,
}

impl InMemoryShipmentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `shipments`. Entries without an id are skipped.
    #[must_use]
    pub fn with_shipments(shipments: impl IntoIterator<Item = Shipment>) -> Self {
        let store = Self::new();
        {
            let mut map = store.shipments.write().unwrap();
            for shipment in shipments {
                if let Some(id) = shipment.id.clone() {
                    map.insert(id, shipment);
                }
            }
        }
        store
    }

    /// Return `error` from the next store operation.
    pub fn fail_next(&self, error: StoreError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// The stored shipment with `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Shipment> {
        self.shipments.read().unwrap().get(id).cloned()
    }

    /// Status of the stored shipment with `id`.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<warehouse_sync_core::ShipmentStatus> {
        self.get(id).and_then(|s| s.status)
    }

    /// Copy of every stored shipment, keyed by id.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Shipment> {
        self.shipments.read().unwrap().clone()
    }

    /// Number of stored shipments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shipments.read().unwrap().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shipments.read().unwrap().is_empty()
    }

    /// Number of successful upserts.
    #[must_use]
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    fn scripted_failure(&self) -> Result<(), StoreError> {
        self.failures.lock().unwrap().pop_front().map_or(Ok(()), Err)
    }
}

impl ShipmentStore for InMemoryShipmentStore {
    fn find_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Shipment>> {
        Box::pin(async move {
            self.scripted_failure()?;
            Ok(self.get(id))
        })
    }

    fn upsert<'a>(&'a self, shipment: &'a Shipment) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.scripted_failure()?;
            let id = shipment.id.clone().ok_or(StoreError::MissingId)?;
            self.shipments.write().unwrap().insert(id, shipment.clone());
            *self.writes.lock().unwrap() += 1;
            Ok(())
        })
    }
}

/// Collects dead letters in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetters {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetters {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded letter, in arrival order.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().unwrap().clone()
    }

    /// Reasons of every recorded letter, in arrival order.
    #[must_use]
    pub fn reasons(&self) -> Vec<DeadLetterReason> {
        self.letters.read().unwrap().iter().map(|l| l.reason).collect()
    }

    /// Number of recorded letters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.letters.read().unwrap().len()
    }

    /// Check if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.letters.read().unwrap().is_empty()
    }
}

impl DeadLetterSink for InMemoryDeadLetters {
    fn record<'a>(&'a self, letter: &'a DeadLetter) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.letters.write().unwrap().push(letter.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warehouse_sync_core::ShipmentStatus;

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryShipmentStore::new();
        store
            .upsert(&Shipment::new("S-1", ShipmentStatus::Planned))
            .await
            .unwrap();
        store
            .upsert(&Shipment::new("S-1", ShipmentStatus::Sent))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.status_of("S-1"), Some(ShipmentStatus::Sent));
    }

    #[tokio::test]
    async fn test_upsert_without_id_fails() {
        let store = InMemoryShipmentStore::new();
        let result = store.upsert(&Shipment::default()).await;

        assert_eq!(result, Err(StoreError::MissingId));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failure_applies_once() {
        let store =
            InMemoryShipmentStore::with_shipments([Shipment::new("S-1", ShipmentStatus::Planned)]);
        store.fail_next(StoreError::DatabaseError("connection reset".into()));

        assert!(store.find_by_id("S-1").await.is_err());
        assert!(store.find_by_id("S-1").await.unwrap().is_some());
    }
}
