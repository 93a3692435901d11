//! `PostgreSQL` implementation of [`ShipmentStore`].

use crate::column;
use sqlx::PgPool;
use warehouse_sync_core::store::StoreFuture;
use warehouse_sync_core::{Shipment, ShipmentStatus, ShipmentStore, StoreError};

/// Shipment records in the `shipments` table.
///
/// The full shipment is kept as JSONB; `status` is duplicated into its own
/// column for querying.
#[derive(Clone, Debug)]
pub struct PostgresShipmentStore {
    pool: PgPool,
}

impl PostgresShipmentStore {
    /// Connect to `database_url` with a default pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ShipmentStore for PostgresShipmentStore {
    fn find_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<Shipment>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT payload FROM shipments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

            let Some(row) = row else {
                return Ok(None);
            };

            let payload: serde_json::Value = column(&row, id, "payload")?;
            serde_json::from_value(payload)
                .map(Some)
                .map_err(|e| StoreError::CorruptRecord {
                    id: id.to_string(),
                    reason: e.to_string(),
                })
        })
    }

    fn upsert<'a>(&'a self, shipment: &'a Shipment) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let id = shipment.id.as_deref().ok_or(StoreError::MissingId)?;
            let payload = serde_json::to_value(shipment).map_err(|e| StoreError::CorruptRecord {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

            sqlx::query(
                r"
                INSERT INTO shipments (id, status, payload, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (id) DO UPDATE
                SET status = EXCLUDED.status,
                    payload = EXCLUDED.payload,
                    updated_at = NOW()
                ",
            )
            .bind(id)
            .bind(shipment.status.map(ShipmentStatus::as_str))
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

            tracing::debug!(id, status = ?shipment.status, "Shipment upserted");
            Ok(())
        })
    }
}
