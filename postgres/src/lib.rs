//! `PostgreSQL` persistence for warehouse sync.
//!
//! This crate provides:
//!
//! - [`PostgresShipmentStore`]: the [`ShipmentStore`](warehouse_sync_core::ShipmentStore)
//!   the consumer reconciles into
//! - [`DeadLetterQueue`]: the [`DeadLetterSink`](warehouse_sync_core::DeadLetterSink)
//!   for poison messages, with operator workflows on top
//! - [`migrate`]: creates the tables both need
//!
//! # Example
//!
//! ```no_run
//! use warehouse_sync_postgres::{DeadLetterQueue, PostgresShipmentStore, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/warehouse").await?;
//! migrate(&pool).await?;
//!
//! let store = PostgresShipmentStore::from_pool(pool.clone());
//! let dlq = DeadLetterQueue::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letter_queue;
mod schema;
mod shipment_store;

pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedMessage};
pub use schema::migrate;
pub use shipment_store::PostgresShipmentStore;

use sqlx::Row;
use sqlx::postgres::PgRow;
use warehouse_sync_core::StoreError;

/// Read column `name` from a row of `record`; a missing column, an
/// unexpected NULL or a type mismatch is reported as a corrupt record.
fn column<'r, T>(row: &'r PgRow, record: &str, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name).map_err(|e| StoreError::CorruptRecord {
        id: record.to_string(),
        reason: format!("column '{name}': {e}"),
    })
}
