//! Ledger events: the only durable state a coordinator has.
//!
//! Every state transition of the work ledger is one of these events. They are
//! appended to the event log in order of occurrence and folded into the
//! ledger in exactly that order, both live and during replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Job, JobId, JobResult};

/// An event as stored in the log for one instance key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Monotonic per instance key, starting at 1.
    pub seq: u64,
    /// When the log accepted the event.
    pub recorded_at: DateTime<Utc>,
    pub event: LedgerEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A new job entered the system.
    WorkAccepted { job: Job },
    /// A job was handed to some worker.
    WorkStarted { job_id: JobId },
    /// A job finished successfully.
    WorkCompleted { job_id: JobId, result: JobResult },
    /// The assigned worker reported failure.
    WorkerFailed { job_id: JobId },
    /// The assignment deadline elapsed with no report.
    WorkerTimedOut { job_id: JobId },
    /// Recovery found in-progress jobs whose assignments died with the
    /// previous incarnation; all of them go back to pending.
    WorkInProgressReset,
}

impl LedgerEvent {
    /// Short name used for metric labels and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::WorkAccepted { .. } => "work_accepted",
            LedgerEvent::WorkStarted { .. } => "work_started",
            LedgerEvent::WorkCompleted { .. } => "work_completed",
            LedgerEvent::WorkerFailed { .. } => "worker_failed",
            LedgerEvent::WorkerTimedOut { .. } => "worker_timed_out",
            LedgerEvent::WorkInProgressReset => "work_in_progress_reset",
        }
    }

    /// The job this event is about, if it concerns a single job.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            LedgerEvent::WorkAccepted { job } => Some(&job.id),
            LedgerEvent::WorkStarted { job_id }
            | LedgerEvent::WorkCompleted { job_id, .. }
            | LedgerEvent::WorkerFailed { job_id }
            | LedgerEvent::WorkerTimedOut { job_id } => Some(job_id),
            LedgerEvent::WorkInProgressReset => None,
        }
    }

    /// Ledger stages a job moves between when this event applies.
    pub fn transition(&self) -> (&'static str, &'static str) {
        match self {
            LedgerEvent::WorkAccepted { .. } => ("new", "pending"),
            LedgerEvent::WorkStarted { .. } => ("pending", "in_progress"),
            LedgerEvent::WorkCompleted { .. } => ("in_progress", "done"),
            LedgerEvent::WorkerFailed { .. }
            | LedgerEvent::WorkerTimedOut { .. }
            | LedgerEvent::WorkInProgressReset => ("in_progress", "pending"),
        }
    }
}
