//! Transient worker registry.
//!
//! Tracks which workers are connected and whether each is idle or busy with
//! a job and a deadline. Nothing here is persisted: after a restart the
//! registry starts empty and fills as workers register again.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::model::{JobId, WorkerId};

/// Messages the coordinator pushes to a worker outside of request replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerNotice {
    /// Work is pending; the worker should request it.
    WorkIsReady,
}

/// Live connection to a worker.
pub type WorkerChannel = mpsc::UnboundedSender<WorkerNotice>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Busy { job_id: JobId, deadline: Instant },
}

#[derive(Debug)]
pub struct WorkerEntry {
    pub id: WorkerId,
    pub channel: WorkerChannel,
    pub status: WorkerStatus,
}

impl WorkerEntry {
    fn notify(&self, notice: WorkerNotice) {
        if self.channel.send(notice).is_err() {
            debug!(worker_id = %self.id, "worker channel closed, notice dropped");
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerEntry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a worker as Idle, or replace the channel of a known one.
    /// Returns true if the worker was not known before.
    pub fn register(&mut self, id: WorkerId, channel: WorkerChannel) -> bool {
        match self.workers.get_mut(&id) {
            Some(entry) => {
                entry.channel = channel;
                false
            }
            None => {
                self.workers.insert(
                    id.clone(),
                    WorkerEntry {
                        id,
                        channel,
                        status: WorkerStatus::Idle,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, id: &WorkerId) -> Option<&WorkerEntry> {
        self.workers.get(id)
    }

    pub fn is_idle(&self, id: &WorkerId) -> bool {
        self.workers
            .get(id)
            .is_some_and(|w| w.status == WorkerStatus::Idle)
    }

    /// Is `id` currently assigned `job_id`?
    pub fn is_busy_with(&self, id: &WorkerId, job_id: &JobId) -> bool {
        matches!(
            self.workers.get(id).map(|w| &w.status),
            Some(WorkerStatus::Busy { job_id: current, .. }) if current == job_id
        )
    }

    pub fn mark_busy(&mut self, id: &WorkerId, job_id: JobId, deadline: Instant) {
        if let Some(entry) = self.workers.get_mut(id) {
            entry.status = WorkerStatus::Busy { job_id, deadline };
        }
    }

    pub fn mark_idle(&mut self, id: &WorkerId) {
        if let Some(entry) = self.workers.get_mut(id) {
            entry.status = WorkerStatus::Idle;
        }
    }

    pub fn remove(&mut self, id: &WorkerId) -> Option<WorkerEntry> {
        self.workers.remove(id)
    }

    /// Busy workers whose deadline is at or before `now`, with their jobs.
    pub fn overdue(&self, now: Instant) -> Vec<(WorkerId, JobId)> {
        let mut overdue: Vec<_> = self
            .workers
            .values()
            .filter_map(|w| match &w.status {
                WorkerStatus::Busy { job_id, deadline } if *deadline <= now => {
                    Some((w.id.clone(), job_id.clone()))
                }
                _ => None,
            })
            .collect();
        overdue.sort();
        overdue
    }

    /// Send a notice to one worker, if it is known.
    pub fn notify(&self, id: &WorkerId, notice: WorkerNotice) {
        if let Some(entry) = self.workers.get(id) {
            entry.notify(notice);
        }
    }

    /// Send a notice to every idle worker.
    pub fn notify_idle(&self, notice: WorkerNotice) {
        for entry in self
            .workers
            .values()
            .filter(|w| w.status == WorkerStatus::Idle)
        {
            entry.notify(notice.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn idle_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == WorkerStatus::Idle)
            .count()
    }

    pub fn clear(&mut self) {
        self.workers.clear();
    }
}
