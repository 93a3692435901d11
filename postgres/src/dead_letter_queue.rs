//! Dead Letter Queue (DLQ) for poison messages.
//!
//! Messages the consumer can never process (undecodable payloads, failed
//! validation, corrupt stored records) are kept here with their delivery
//! coordinates. An operator lists them, moves them through [`DLQStatus`] and
//! finally resolves or discards them.

use chrono::{DateTime, Utc};
use crate::column;
use sqlx::PgPool;
use warehouse_sync_core::store::StoreFuture;
use warehouse_sync_core::{AckHandle, DeadLetter, DeadLetterSink, Delivery, StoreError};

const SELECT_COLUMNS: &str = r"
    SELECT
        id, topic, message_key, partition_id, message_offset, payload,
        reason, error_message, failed_at, status,
        resolved_at, resolved_by, resolution_notes
    FROM failed_messages
";

/// Status of a failed message in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Waiting for investigation
    Pending,
    /// Under investigation
    Processing,
    /// Handled by an operator
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl DLQStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::DatabaseError(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// An entry in the Dead Letter Queue.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Unique identifier for this DLQ entry
    pub id: i64,

    /// The message as it was delivered
    pub delivery: Delivery,

    /// Failure category (`deserialization`, `validation`, `store`)
    pub reason: String,

    /// Error message from the failure
    pub error_message: String,

    /// When the consumer gave up on the message
    pub failed_at: DateTime<Utc>,

    /// Current processing status
    pub status: DLQStatus,

    /// When the entry was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,

    /// Who resolved the entry
    pub resolved_by: Option<String>,

    /// Resolution or discard notes
    pub resolution_notes: Option<String>,
}

impl FailedMessage {
    /// The payload as text, if it is valid UTF-8.
    #[must_use]
    pub fn payload_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.delivery.payload).ok()
    }
}

/// `PostgreSQL`-based Dead Letter Queue for poison messages.
///
/// # Example
///
/// ```no_run
/// use warehouse_sync_postgres::{DLQStatus, DeadLetterQueue};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// println!("Pending failures: {}", pending.len());
///
/// if let Some(entry) = pending.first() {
///     dlq.update_status(entry.id, DLQStatus::Processing).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a new Dead Letter Queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add a dead letter, returning the id of the new entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the insert fails.
    pub async fn add_entry(&self, letter: &DeadLetter) -> Result<i64, StoreError> {
        let delivery = &letter.delivery;
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_messages (
                topic, message_key, partition_id, message_offset, payload,
                reason, error_message, failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            ",
        )
        .bind(&delivery.topic)
        .bind(delivery.key.as_deref())
        .bind(delivery.partition)
        .bind(delivery.offset)
        .bind(&delivery.payload)
        .bind(letter.reason.as_str())
        .bind(&letter.error_message)
        .bind(letter.failed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(
            dlq_id = id,
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            reason = letter.reason.as_str(),
            error = %letter.error_message,
            "Message added to Dead Letter Queue"
        );

        metrics::counter!("shipment_sync.dlq.added", "reason" => letter.reason.as_str())
            .increment(1);

        Ok(id)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails, or
    /// [`StoreError::CorruptRecord`] if a row cannot be decoded.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedMessage>, StoreError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// List entries with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails, or
    /// [`StoreError::CorruptRecord`] if a row cannot be decoded.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: usize,
    ) -> Result<Vec<FailedMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let query = format!("{SELECT_COLUMNS} WHERE status = $1 ORDER BY failed_at ASC, id ASC LIMIT $2");

        let rows = sqlx::query(&query)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_failed_message).collect()
    }

    /// Get a specific entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails or the entry is not found,
    /// or [`StoreError::CorruptRecord`] if the row cannot be decoded.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedMessage, StoreError> {
        let query = format!("{SELECT_COLUMNS} WHERE id = $1");

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Self::row_to_failed_message(&row)
    }

    /// Update the status of an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the update fails.
    pub async fn update_status(&self, id: i64, status: DLQStatus) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            ",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");

        Ok(())
    }

    /// Mark an entry as resolved.
    ///
    /// # Arguments
    ///
    /// * `id` - The DLQ entry ID
    /// * `resolved_by` - Who resolved it (username, batch job)
    /// * `notes` - What was done
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'resolved',
                updated_at = NOW(),
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");

        metrics::counter!("shipment_sync.dlq.resolved").increment(1);

        Ok(())
    }

    /// Permanently drop an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the update fails.
    pub async fn discard(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'discarded',
                updated_at = NOW(),
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(dlq_id = id, reason, "DLQ entry discarded");

        metrics::counter!("shipment_sync.dlq.discarded").increment(1);

        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_messages WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    fn row_to_failed_message(row: &sqlx::postgres::PgRow) -> Result<FailedMessage, StoreError> {
        let id: i64 = column(row, "failed_messages", "id")?;
        let record = format!("failed_messages/{id}");
        let status_str: String = column(row, &record, "status")?;
        let status = DLQStatus::parse(&status_str)?;

        Ok(FailedMessage {
            id,
            delivery: Delivery {
                topic: column(row, &record, "topic")?,
                key: column(row, &record, "message_key")?,
                payload: column(row, &record, "payload")?,
                partition: column(row, &record, "partition_id")?,
                offset: column(row, &record, "message_offset")?,
                ack: AckHandle::default(),
            },
            reason: column(row, &record, "reason")?,
            error_message: column(row, &record, "error_message")?,
            failed_at: column(row, &record, "failed_at")?,
            status,
            resolved_at: column(row, &record, "resolved_at")?,
            resolved_by: column(row, &record, "resolved_by")?,
            resolution_notes: column(row, &record, "resolution_notes")?,
        })
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn record<'a>(&'a self, letter: &'a DeadLetter) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.add_entry(letter).await.map(|_| ()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in &[
            DLQStatus::Pending,
            DLQStatus::Processing,
            DLQStatus::Resolved,
            DLQStatus::Discarded,
        ] {
            let parsed = DLQStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(matches!(
            DLQStatus::parse("replayed"),
            Err(StoreError::DatabaseError(msg)) if msg.contains("replayed")
        ));
    }

    #[test]
    fn payload_text_requires_utf8() {
        let mut entry = FailedMessage {
            id: 1,
            delivery: Delivery {
                topic: "SHIPMENT".to_string(),
                key: None,
                payload: b"not json".to_vec(),
                partition: 0,
                offset: 7,
                ack: AckHandle::default(),
            },
            reason: "deserialization".to_string(),
            error_message: "expected value".to_string(),
            failed_at: Utc::now(),
            status: DLQStatus::Pending,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        };
        assert_eq!(entry.payload_text(), Some("not json"));

        entry.delivery.payload = vec![0xff, 0xfe];
        assert_eq!(entry.payload_text(), None);
    }
}
