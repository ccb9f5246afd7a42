//! Result announcement.
//!
//! The coordinator calls [`Announcer::announce`] once for every job whose
//! `WorkCompleted` event became durable. Delivery to subscribers beyond that
//! call belongs to the announcer.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::Db;
use crate::db::pgmq::RESULTS_QUEUE;
use crate::error::{Error, Result};
use crate::model::{JobId, JobResult};

/// A completed job's result as published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub job_id: JobId,
    pub result: JobResult,
}

pub trait Announcer: Send + Sync + 'static {
    fn announce(&self, announcement: Announcement) -> impl Future<Output = Result<()>> + Send;
}

/// In-process results topic backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastAnnouncer {
    tx: broadcast::Sender<Announcement>,
}

impl BroadcastAnnouncer {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Announcement> {
        self.tx.subscribe()
    }
}

impl Announcer for BroadcastAnnouncer {
    async fn announce(&self, announcement: Announcement) -> Result<()> {
        // No subscribers is fine: nobody is interested yet.
        let _ = self.tx.send(announcement);
        Ok(())
    }
}

/// Publishes results to the pgmq `results` queue.
#[derive(Clone)]
pub struct PgmqAnnouncer {
    db: Db,
}

impl PgmqAnnouncer {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl Announcer for PgmqAnnouncer {
    async fn announce(&self, announcement: Announcement) -> Result<()> {
        let payload = serde_json::to_value(&announcement)?;
        self.db
            .send_to_queue(RESULTS_QUEUE, &payload)
            .await
            .map_err(|e| Error::Announce(format!("{}: {e}", announcement.job_id)))?;
        Ok(())
    }
}
