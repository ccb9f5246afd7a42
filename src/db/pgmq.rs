//! pgmq queue operations via direct SQLx.
//!
//! The coordinator only needs a small slice of pgmq: create the results
//! queue, send announcements to it, and let operators read them back.

use crate::error::Result;
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

/// Queue that completed job results are announced on.
pub const RESULTS_QUEUE: &str = "results";

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub message: serde_json::Value,
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

impl super::Db {
    /// Create a pgmq queue. Idempotent.
    pub async fn create_queue(&self, queue: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue)
            .execute(&self.pool)
            .await?;
        record_queue_op(queue, "create");
        Ok(())
    }

    /// Send a message for immediate delivery. Returns the pgmq message id.
    pub async fn send_to_queue(&self, queue: &str, payload: &serde_json::Value) -> Result<i64> {
        let (msg_id,): (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2)")
            .bind(queue)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        record_queue_op(queue, "send");
        Ok(msg_id)
    }

    /// Read one message, hiding it from other readers for `vt_seconds`.
    pub async fn read_from_queue(
        &self,
        queue: &str,
        vt_seconds: i32,
    ) -> Result<Option<QueuedMessage>> {
        let row: Option<(i64, i32, DateTime<Utc>, serde_json::Value)> = sqlx::query_as(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)",
        )
        .bind(queue)
        .bind(vt_seconds)
        .fetch_optional(&self.pool)
        .await?;

        record_queue_op(queue, if row.is_some() { "read" } else { "read_empty" });

        Ok(row.map(|(msg_id, read_ct, enqueued_at, message)| QueuedMessage {
            msg_id,
            read_ct,
            enqueued_at,
            message,
        }))
    }

    /// Move a message to the archive table.
    pub async fn archive_message(&self, queue: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        record_queue_op(queue, "archive");
        Ok(())
    }
}
