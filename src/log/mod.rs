//! Append-only event log contract.
//!
//! One stream per instance key. `append` confirms only once the event is
//! durable; `replay` yields every event of a stream in append order.
//! The Postgres implementation lives on [`crate::db::Db`].

pub mod memory;

pub use memory::MemoryEventLog;

use std::future::Future;

use crate::error::Result;
use crate::event::{LedgerEvent, StoredEvent};

pub trait EventLog: Send + Sync + 'static {
    /// Durably append `event` to the stream for `key`. Returns its sequence number.
    fn append(&self, key: &str, event: &LedgerEvent) -> impl Future<Output = Result<u64>> + Send;

    /// All events of the stream for `key`, oldest first.
    fn replay(&self, key: &str) -> impl Future<Output = Result<Vec<StoredEvent>>> + Send;
}
