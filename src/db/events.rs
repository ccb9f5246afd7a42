//! Durable ledger event streams in Postgres.
//!
//! Each row is one event of one instance key's stream. The sequence number is
//! assigned inside the insert, so it is gap-free per key as long as a single
//! coordinator owns the key.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::{LedgerEvent, StoredEvent};
use crate::log::EventLog;

type EventRow = (i64, DateTime<Utc>, serde_json::Value);

impl super::Db {
    /// Events of `key` with `seq > since`, oldest first.
    pub async fn list_events(&self, key: &str, since: u64) -> Result<Vec<StoredEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT seq, recorded_at, event FROM ledger_events
             WHERE instance_key = $1 AND seq > $2
             ORDER BY seq ASC",
        )
        .bind(key)
        .bind(since as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_stored_event).collect()
    }
}

fn row_to_stored_event((seq, recorded_at, event): EventRow) -> Result<StoredEvent> {
    Ok(StoredEvent {
        seq: seq as u64,
        recorded_at,
        event: serde_json::from_value(event)?,
    })
}

impl EventLog for super::Db {
    async fn append(&self, key: &str, event: &LedgerEvent) -> Result<u64> {
        let payload = serde_json::to_value(event)?;
        let job_id = event.job_id().map(|id| id.as_str().to_string());

        let (seq,): (i64,) = sqlx::query_as(
            "INSERT INTO ledger_events (instance_key, seq, kind, job_id, event)
             SELECT $1, COALESCE(MAX(seq), 0) + 1, $2, $3, $4
             FROM ledger_events WHERE instance_key = $1
             RETURNING seq",
        )
        .bind(key)
        .bind(event.kind())
        .bind(job_id)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(seq as u64)
    }

    async fn replay(&self, key: &str) -> Result<Vec<StoredEvent>> {
        self.list_events(key, 0).await
    }
}
