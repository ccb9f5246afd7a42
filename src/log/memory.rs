//! Process-local event log.
//!
//! Clones share the same streams, so a second coordinator built from a clone
//! sees everything the first one appended, the way a restarted process would
//! see its database. Faults and latency can be injected for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use super::EventLog;
use crate::error::{Error, Result};
use crate::event::{LedgerEvent, StoredEvent};

#[derive(Clone, Default)]
pub struct MemoryEventLog {
    streams: Arc<Mutex<HashMap<String, Vec<StoredEvent>>>>,
    failing_appends: Arc<AtomicUsize>,
    failing_replays: Arc<AtomicUsize>,
    append_delay: Option<Duration>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every append by `delay` before it is recorded.
    pub fn with_append_delay(mut self, delay: Duration) -> Self {
        self.append_delay = Some(delay);
        self
    }

    /// Make the next `n` appends fail without recording anything.
    pub fn fail_next_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` replays fail.
    pub fn fail_next_replays(&self, n: usize) {
        self.failing_replays.store(n, Ordering::SeqCst);
    }

    /// Snapshot of the stream for `key`.
    pub async fn events(&self, key: &str) -> Vec<StoredEvent> {
        self.streams
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

/// Consume one pending injected fault, if any.
fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl EventLog for MemoryEventLog {
    async fn append(&self, key: &str, event: &LedgerEvent) -> Result<u64> {
        if let Some(delay) = self.append_delay {
            tokio::time::sleep(delay).await;
        }
        if take_fault(&self.failing_appends) {
            return Err(Error::LogUnavailable(format!(
                "injected append failure for {key}"
            )));
        }

        let mut streams = self.streams.lock().await;
        let stream = streams.entry(key.to_string()).or_default();
        let seq = stream.len() as u64 + 1;
        stream.push(StoredEvent {
            seq,
            recorded_at: Utc::now(),
            event: event.clone(),
        });
        Ok(seq)
    }

    async fn replay(&self, key: &str) -> Result<Vec<StoredEvent>> {
        if take_fault(&self.failing_replays) {
            return Err(Error::LogUnavailable(format!(
                "injected replay failure for {key}"
            )));
        }
        Ok(self.events(key).await)
    }
}
