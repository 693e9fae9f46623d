//! Dispatch queue operations via pgmq.
//!
//! One logical queue per work kind. Delivery to the capture pool is
//! at-least-once; the correlation timeout is the correctness backstop when
//! a message is lost or seen twice.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{WorkItem, WorkKind};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Multi-producer handoff into the external capture pool. `push` must not
/// block beyond ordinary broker latency.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueue the canonical encoding of a work item. Returns the broker
    /// message id.
    async fn push(&self, item: &WorkItem) -> Result<i64>;
}

/// A message read back from a pgmq queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

impl super::Db {
    /// Create the pgmq queue for a kind (idempotent).
    pub async fn create_queue(&self, kind: WorkKind) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(kind.queue_name())
            .execute(self.pool())
            .await?;
        record_queue_op(kind.queue_name(), "create");
        Ok(())
    }

    /// Read the next message from a kind's queue (visibility timeout in
    /// seconds). Returns None if the queue is empty. Used by queue
    /// inspection tooling, not by the orchestrators.
    pub async fn read_from_queue(
        &self,
        kind: WorkKind,
        vt_seconds: i32,
    ) -> Result<Option<QueueMessage>> {
        let row = sqlx::query_as::<
            _,
            (i64, i32, chrono::DateTime<chrono::Utc>, serde_json::Value),
        >("SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)")
        .bind(kind.queue_name())
        .bind(vt_seconds)
        .fetch_optional(self.pool())
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, message)| QueueMessage {
            msg_id,
            read_ct,
            enqueued_at,
            message,
        });

        record_queue_op(
            kind.queue_name(),
            if msg.is_some() { "read" } else { "read_empty" },
        );
        Ok(msg)
    }

    /// Archive a message (moves to archive table, preserves for audit).
    pub async fn archive_message(&self, kind: WorkKind, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(kind.queue_name())
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        record_queue_op(kind.queue_name(), "archive");
        Ok(())
    }
}

#[async_trait]
impl DispatchQueue for super::Db {
    async fn push(&self, item: &WorkItem) -> Result<i64> {
        // Canonical encoding: identical logical items enqueue identical
        // bytes, so any content-hash dedup downstream stays coherent.
        let payload: serde_json::Value = serde_json::from_str(&item.canonical_json()?)?;
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(item.kind.queue_name())
            .bind(&payload)
            .bind(0i32)
            .fetch_one(self.pool())
            .await?;
        record_queue_op(item.kind.queue_name(), "send");
        Ok(row.0)
    }
}

fn record_queue_op(queue: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}
