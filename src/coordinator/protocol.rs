//! Requests accepted by the coordinator task.

use tokio::sync::oneshot;

use crate::model::{Ack, Job, JobId, JobResult, WorkerId};
use crate::registry::WorkerChannel;

/// Reply slot for a request. Dropping it without sending means "no reply".
pub type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub enum Command {
    SubmitJob {
        job: Job,
        reply: Reply<Ack>,
    },
    RegisterWorker {
        worker_id: WorkerId,
        channel: WorkerChannel,
    },
    WorkerRequestsWork {
        worker_id: WorkerId,
        reply: Reply<Job>,
    },
    WorkIsDone {
        worker_id: WorkerId,
        job_id: JobId,
        result: JobResult,
        reply: Reply<Ack>,
    },
    WorkFailed {
        worker_id: WorkerId,
        job_id: JobId,
    },
    Status {
        reply: Reply<CoordinatorStatus>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SubmitJob { .. } => "submit_job",
            Command::RegisterWorker { .. } => "register_worker",
            Command::WorkerRequestsWork { .. } => "worker_requests_work",
            Command::WorkIsDone { .. } => "work_is_done",
            Command::WorkFailed { .. } => "work_failed",
            Command::Status { .. } => "status",
        }
    }
}

/// Point-in-time view of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub instance_key: String,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub workers: usize,
    pub idle_workers: usize,
    /// Restarts since the coordinator was spawned.
    pub restarts: u32,
}
