//! Table definitions.

use sqlx::PgPool;
use warehouse_sync_core::StoreError;

const STATEMENTS: [&str; 5] = [
    r"
    CREATE TABLE IF NOT EXISTS shipments (
        id TEXT PRIMARY KEY,
        status TEXT,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_shipments_status ON shipments(status)",
    r"
    CREATE TABLE IF NOT EXISTS failed_messages (
        id BIGSERIAL PRIMARY KEY,
        topic TEXT NOT NULL,
        message_key TEXT,
        partition_id INTEGER NOT NULL,
        message_offset BIGINT NOT NULL,
        payload BYTEA NOT NULL,
        reason TEXT NOT NULL,
        error_message TEXT NOT NULL,
        failed_at TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        resolved_at TIMESTAMPTZ,
        resolved_by TEXT,
        resolution_notes TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_failed_messages_status ON failed_messages(status, failed_at)",
    "CREATE INDEX IF NOT EXISTS idx_failed_messages_reason ON failed_messages(reason)",
];

/// Create the `shipments` and `failed_messages` tables if they do not exist.
///
/// # Errors
///
/// Returns [`StoreError::DatabaseError`] if a statement fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
    }

    tracing::info!("Warehouse sync schema ready");
    Ok(())
}
