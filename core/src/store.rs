//! Persistence collaborators of the consumer.
//!
//! [`ShipmentStore`] holds the reconciled shipment records; [`DeadLetterSink`]
//! receives messages that can never be processed.
//!
//! # Implementations
//!
//! - `PostgresShipmentStore`, `DeadLetterQueue` (in `warehouse-sync-postgres`)
//! - `InMemoryShipmentStore`, `InMemoryDeadLetters` (in `warehouse-sync-testing`)

use crate::channel::Delivery;
use crate::shipment::Shipment;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by store implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored record could not be decoded.
    #[error("Corrupt record '{id}': {reason}")]
    CorruptRecord {
        /// Record identifier.
        id: String,
        /// Decoding failure.
        reason: String,
    },

    /// The record to upsert has no identifier.
    #[error("Shipment has no id")]
    MissingId,
}

impl StoreError {
    /// Returns `true` when the same call may succeed later.
    ///
    /// Only database errors qualify; a corrupt record or a missing id fails
    /// the same way on every attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError(_))
    }
}

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable storage of shipments.
///
/// Must be read-your-writes consistent for a single id across sequential
/// calls; the consumer reads, checks the transition, then writes.
pub trait ShipmentStore: Send + Sync {
    /// Load the shipment with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn find_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Shipment>>;

    /// Insert or replace the shipment keyed by its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingId`] for a shipment without an id, or
    /// [`StoreError::DatabaseError`] if the write fails.
    fn upsert<'a>(&'a self, shipment: &'a Shipment) -> StoreFuture<'a, ()>;
}

/// Why a message was dead-lettered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeadLetterReason {
    /// Payload was not a valid shipment document.
    Deserialization,
    /// Payload parsed but failed field validation.
    Validation,
    /// The stored record could not be reconciled, e.g. it is corrupt.
    Store,
}

impl DeadLetterReason {
    /// Database/label representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deserialization => "deserialization",
            Self::Validation => "validation",
            Self::Store => "store",
        }
    }
}

/// A message that could not be processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// The original delivery.
    pub delivery: Delivery,
    /// Failure category.
    pub reason: DeadLetterReason,
    /// Human-readable error.
    pub error_message: String,
    /// When the failure was observed.
    pub failed_at: DateTime<Utc>,
}

/// Destination for poison messages.
pub trait DeadLetterSink: Send + Sync {
    /// Record a failed message for later investigation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    fn record<'a>(&'a self, letter: &'a DeadLetter) -> StoreFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_database_errors_are_transient() {
        assert!(StoreError::DatabaseError("connection reset".into()).is_transient());
        assert!(
            !StoreError::CorruptRecord {
                id: "S-1".into(),
                reason: "expected object".into()
            }
            .is_transient()
        );
        assert!(!StoreError::MissingId.is_transient());
    }
}
