//! Client side of the coordinator: submitters and workers talk through this.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc, oneshot};

use super::protocol::{Command, CoordinatorStatus};
use crate::error::{Error, Result};
use crate::model::{Ack, Job, JobId, JobResult, WorkerId};
use crate::registry::WorkerNotice;

/// Cheap to clone; every clone feeds the same coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
    shutdown: Arc<Notify>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>, shutdown: Arc<Notify>) -> Self {
        Self { tx, shutdown }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::CoordinatorStopped)
    }

    /// Send a request and wait for its reply. A dropped reply means the
    /// request was not acknowledged.
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| Error::Unacknowledged)
    }

    /// Submit a job. Safe to repeat for the same id.
    pub async fn submit(&self, job: Job) -> Result<Ack> {
        self.call(|reply| Command::SubmitJob { job, reply }).await
    }

    /// Register (or re-register) a worker. Returns its notice stream; a
    /// previous stream for the same id stops receiving.
    pub async fn register_worker(
        &self,
        worker_id: impl Into<WorkerId>,
    ) -> Result<mpsc::UnboundedReceiver<WorkerNotice>> {
        let (channel, notices) = mpsc::unbounded_channel();
        self.send(Command::RegisterWorker {
            worker_id: worker_id.into(),
            channel,
        })
        .await?;
        Ok(notices)
    }

    /// Ask for a job. `None` means nothing was handed out.
    pub async fn request_work(&self, worker_id: impl Into<WorkerId>) -> Result<Option<Job>> {
        let worker_id = worker_id.into();
        match self
            .call(|reply| Command::WorkerRequestsWork { worker_id, reply })
            .await
        {
            Ok(job) => Ok(Some(job)),
            Err(Error::Unacknowledged) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Report a finished job. Safe to repeat until the ack arrives.
    pub async fn report_done(
        &self,
        worker_id: impl Into<WorkerId>,
        job_id: impl Into<JobId>,
        result: JobResult,
    ) -> Result<Ack> {
        let worker_id = worker_id.into();
        let job_id = job_id.into();
        self.call(|reply| Command::WorkIsDone {
            worker_id,
            job_id,
            result,
            reply,
        })
        .await
    }

    pub async fn report_failed(
        &self,
        worker_id: impl Into<WorkerId>,
        job_id: impl Into<JobId>,
    ) -> Result<()> {
        self.send(Command::WorkFailed {
            worker_id: worker_id.into(),
            job_id: job_id.into(),
        })
        .await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Ask the coordinator to stop after the request it is processing.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
