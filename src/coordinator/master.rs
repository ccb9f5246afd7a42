//! Coordinator state machine.
//!
//! One task owns the ledger and the worker registry for an instance key. Each
//! incarnation first replays the event log (recovering), then serves requests
//! from the inbox one at a time (ready).
//!
//! Nothing observable happens before the event behind it is durable. While an
//! append is in flight the inbox keeps being drained into a FIFO stash; the
//! stash is emptied, in order, before the inbox is read again. At most one
//! append is outstanding at any time.
//!
//! An append that failed or timed out may still have become durable. The
//! event is kept across the restart and settled against the replayed ledger:
//! a completion that turns out to be durable is announced then.

use std::collections::VecDeque;
use std::sync::Arc;

use opentelemetry::KeyValue;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::handle::CoordinatorHandle;
use super::protocol::{Command, CoordinatorStatus, Reply};
use super::supervisor::RestartWindow;
use super::CoordinatorConfig;
use crate::announce::{Announcement, Announcer};
use crate::error::{Error, Result};
use crate::event::LedgerEvent;
use crate::ledger::Ledger;
use crate::log::EventLog;
use crate::model::{Ack, Job, JobId, JobResult, WorkerId};
use crate::registry::{WorkerChannel, WorkerNotice, WorkerRegistry};
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

pub struct Coordinator<L, A> {
    config: CoordinatorConfig,
    log: L,
    announcer: A,
    inbox: mpsc::Receiver<Command>,
    inbox_open: bool,
    /// Commands that arrived while an append was in flight.
    stash: VecDeque<Command>,
    /// Event whose append was never confirmed. Survives restarts.
    unconfirmed: Option<LedgerEvent>,
    shutdown: Arc<Notify>,
    ledger: Ledger,
    registry: WorkerRegistry,
    restarts: RestartWindow,
}

impl<L: EventLog, A: Announcer> Coordinator<L, A> {
    /// Build a coordinator and its handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` does not validate.
    pub fn new(
        config: CoordinatorConfig,
        log: L,
        announcer: A,
    ) -> Result<(Self, CoordinatorHandle)> {
        config.validate()?;
        let (tx, inbox) = mpsc::channel(config.inbox_capacity);
        let shutdown = Arc::new(Notify::new());
        let handle = CoordinatorHandle::new(tx, Arc::clone(&shutdown));

        let coordinator = Self {
            restarts: RestartWindow::new(config.restart),
            config,
            log,
            announcer,
            inbox,
            inbox_open: true,
            stash: VecDeque::new(),
            unconfirmed: None,
            shutdown,
            ledger: Ledger::default(),
            registry: WorkerRegistry::new(),
        };
        Ok((coordinator, handle))
    }

    /// Build a coordinator and run it on its own task.
    pub fn spawn(
        config: CoordinatorConfig,
        log: L,
        announcer: A,
    ) -> Result<(CoordinatorHandle, JoinHandle<Result<()>>)> {
        let (coordinator, handle) = Self::new(config, log, announcer)?;
        Ok((handle, tokio::spawn(coordinator.run())))
    }

    /// Run until shutdown, until every handle is dropped, or until the
    /// restart budget is exhausted.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let err = match self.serve().await {
                Ok(()) => {
                    info!(instance_key = %self.config.instance_key, "coordinator stopped");
                    return Ok(());
                }
                Err(e) => e,
            };

            let policy = *self.restarts.policy();
            if !self.restarts.permit(Instant::now()) {
                error!(
                    instance_key = %self.config.instance_key,
                    error = %err,
                    max_restarts = policy.max_restarts,
                    "restart limit exceeded, coordinator giving up"
                );
                return Err(Error::RestartLimitExceeded {
                    restarts: policy.max_restarts,
                    within: policy.within,
                });
            }

            let backoff = self.restarts.backoff();
            metrics::coordinator_restarts().add(
                1,
                &[KeyValue::new("instance_key", self.config.instance_key.clone())],
            );
            warn!(
                instance_key = %self.config.instance_key,
                error = %err,
                restart = self.restarts.total(),
                ?backoff,
                "coordinator failed, restarting with full replay"
            );
            self.ledger = Ledger::default();
            self.registry.clear();
            tokio::time::sleep(backoff).await;
        }
    }

    /// One incarnation: recover, then serve until stopped or failed.
    async fn serve(&mut self) -> Result<()> {
        let span = info_span!(
            "coordinator.serve",
            instance_key = %self.config.instance_key,
            incarnation = %Uuid::new_v4(),
        );
        self.serve_incarnation().instrument(span).await
    }

    async fn serve_incarnation(&mut self) -> Result<()> {
        self.recover().await?;

        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(command) = self.stash.pop_front() {
                self.handle(command).await?;
                continue;
            }
            if !self.inbox_open {
                info!("all handles dropped");
                return Ok(());
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                _ = sweep.tick() => self.sweep_timeouts().await?,
                command = self.inbox.recv() => match command {
                    Some(command) => self.handle(command).await?,
                    None => self.inbox_open = false,
                },
            }
        }
    }

    /// Rebuild the ledger from the log before any request is looked at.
    async fn recover(&mut self) -> Result<()> {
        info!("replaying event log");
        let events = self.log.replay(&self.config.instance_key).await?;
        self.ledger = Ledger::replay(events.iter().map(|stored| &stored.event));

        info!(
            replayed = events.len(),
            pending = self.ledger.pending_count(),
            in_progress = self.ledger.in_progress_count(),
            done = self.ledger.done_count(),
            "replay complete"
        );

        if let Some(event) = self.unconfirmed.take() {
            self.settle_unconfirmed(event).await;
        }

        // Assignments died with the previous registry; nothing would ever
        // time these jobs out.
        if self.ledger.admits(&LedgerEvent::WorkInProgressReset) {
            let stranded = self.ledger.in_progress_count();
            self.record(LedgerEvent::WorkInProgressReset).await?;
            info!(stranded, "requeued work left in progress");
        }

        info!("coordinator ready");
        Ok(())
    }

    /// Finish the side effects of an event whose append turned out durable.
    async fn settle_unconfirmed(&mut self, event: LedgerEvent) {
        match event {
            LedgerEvent::WorkCompleted { job_id, result } if self.ledger.is_done(&job_id) => {
                info!(%job_id, "unconfirmed completion is durable, announcing");
                self.announce(Announcement { job_id, result }).await;
            }
            event => {
                debug!(
                    kind = event.kind(),
                    job_id = ?event.job_id(),
                    "unconfirmed event settled by replay"
                );
            }
        }
    }

    async fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::SubmitJob { job, reply } => self.on_submit(job, reply).await,
            Command::RegisterWorker { worker_id, channel } => {
                self.on_register(worker_id, channel);
                Ok(())
            }
            Command::WorkerRequestsWork { worker_id, reply } => {
                self.on_request_work(worker_id, reply).await
            }
            Command::WorkIsDone {
                worker_id,
                job_id,
                result,
                reply,
            } => self.on_done(worker_id, job_id, result, reply).await,
            Command::WorkFailed { worker_id, job_id } => self.on_failed(worker_id, job_id).await,
            Command::Status { reply } => {
                let _ = reply.send(self.status());
                Ok(())
            }
        }
    }

    async fn on_submit(&mut self, job: Job, reply: Reply<Ack>) -> Result<()> {
        let ack = Ack {
            job_id: job.id.clone(),
        };

        if self.ledger.is_accepted(&job.id) {
            debug!(job_id = %job.id, "duplicate submission, re-acknowledging");
            metrics::jobs_submitted().add(1, &[KeyValue::new("result", "duplicate")]);
            let _ = reply.send(ack);
            return Ok(());
        }

        self.record(LedgerEvent::WorkAccepted { job }).await?;

        metrics::jobs_submitted().add(1, &[KeyValue::new("result", "accepted")]);
        info!(job_id = %ack.job_id, "job accepted");
        let _ = reply.send(ack);
        self.notify_work_available();
        Ok(())
    }

    fn on_register(&mut self, worker_id: WorkerId, channel: WorkerChannel) {
        if self.registry.register(worker_id.clone(), channel) {
            info!(%worker_id, "worker registered");
        } else {
            debug!(%worker_id, "worker re-registered");
        }

        if self.ledger.has_work() && self.registry.is_idle(&worker_id) {
            self.registry.notify(&worker_id, WorkerNotice::WorkIsReady);
        }
    }

    async fn on_request_work(&mut self, worker_id: WorkerId, reply: Reply<Job>) -> Result<()> {
        let Some(job) = self.ledger.next_work().cloned() else {
            debug!(%worker_id, "no pending work");
            return Ok(());
        };
        if !self.registry.is_idle(&worker_id) {
            debug!(%worker_id, "ignoring work request from unknown or busy worker");
            return Ok(());
        }

        self.record(LedgerEvent::WorkStarted {
            job_id: job.id.clone(),
        })
        .await?;

        let deadline = Instant::now() + self.config.work_timeout;
        self.registry.mark_busy(&worker_id, job.id.clone(), deadline);
        info!(%worker_id, job_id = %job.id, "job assigned");

        if let Err(job) = reply.send(job) {
            warn!(%worker_id, job_id = %job.id, "worker gone before delivery, awaiting timeout");
        }
        Ok(())
    }

    async fn on_done(
        &mut self,
        worker_id: WorkerId,
        job_id: JobId,
        result: JobResult,
        reply: Reply<Ack>,
    ) -> Result<()> {
        let ack = Ack {
            job_id: job_id.clone(),
        };

        if self.ledger.is_done(&job_id) {
            // The earlier ack was lost; say it again.
            if self.registry.is_busy_with(&worker_id, &job_id) {
                self.registry.mark_idle(&worker_id);
            }
            metrics::worker_reports().add(1, &[KeyValue::new("outcome", "redundant")]);
            debug!(%worker_id, %job_id, "job already done, re-acknowledging");
            let _ = reply.send(ack);
            return Ok(());
        }

        if !self.ledger.is_in_progress(&job_id) {
            metrics::worker_reports().add(1, &[KeyValue::new("outcome", "stale")]);
            warn!(%worker_id, %job_id, "dropping completion for job not in progress");
            return Ok(());
        }

        self.record(LedgerEvent::WorkCompleted {
            job_id: job_id.clone(),
            result: result.clone(),
        })
        .await?;

        if self.registry.is_busy_with(&worker_id, &job_id) {
            self.registry.mark_idle(&worker_id);
        }
        self.announce(Announcement {
            job_id: job_id.clone(),
            result,
        })
        .await;

        metrics::worker_reports().add(1, &[KeyValue::new("outcome", "done")]);
        info!(%worker_id, %job_id, "job completed");
        let _ = reply.send(ack);
        Ok(())
    }

    async fn on_failed(&mut self, worker_id: WorkerId, job_id: JobId) -> Result<()> {
        if !self.ledger.is_in_progress(&job_id) {
            metrics::worker_reports().add(1, &[KeyValue::new("outcome", "stale")]);
            warn!(%worker_id, %job_id, "dropping failure for job not in progress");
            return Ok(());
        }

        self.record(LedgerEvent::WorkerFailed {
            job_id: job_id.clone(),
        })
        .await?;

        if self.registry.is_busy_with(&worker_id, &job_id) {
            self.registry.mark_idle(&worker_id);
        }
        metrics::worker_reports().add(1, &[KeyValue::new("outcome", "failed")]);
        info!(%worker_id, %job_id, "job failed, requeued");
        self.notify_work_available();
        Ok(())
    }

    /// Requeue the jobs of workers whose deadline passed and forget those workers.
    async fn sweep_timeouts(&mut self) -> Result<()> {
        for (worker_id, job_id) in self.registry.overdue(Instant::now()) {
            if self.ledger.is_in_progress(&job_id) {
                self.record(LedgerEvent::WorkerTimedOut {
                    job_id: job_id.clone(),
                })
                .await?;
                metrics::workers_timed_out().add(1, &[]);
                warn!(%worker_id, %job_id, "worker timed out, job requeued");
            } else {
                debug!(%worker_id, %job_id, "overdue worker held a finished job");
            }

            self.registry.remove(&worker_id);
            self.notify_work_available();
        }
        Ok(())
    }

    fn notify_work_available(&self) {
        if self.ledger.has_work() {
            self.registry.notify_idle(WorkerNotice::WorkIsReady);
        }
    }

    async fn announce(&self, announcement: Announcement) {
        let job_id = announcement.job_id.clone();
        match self.announcer.announce(announcement).await {
            Ok(()) => {
                metrics::results_announced().add(1, &[KeyValue::new("status", "ok")]);
            }
            Err(e) => {
                metrics::results_announced().add(1, &[KeyValue::new("status", "error")]);
                error!(%job_id, error = %e, "result announcement failed");
            }
        }
    }

    /// Durably append `event`, then fold it into the ledger.
    ///
    /// Commands arriving meanwhile are stashed. On failure the ledger is left
    /// untouched and the error ends the current incarnation.
    async fn record(&mut self, event: LedgerEvent) -> Result<u64> {
        let kind = event.kind();
        let timeout = self.config.append_timeout;
        let started = Instant::now();
        self.unconfirmed = Some(event.clone());

        let outcome = {
            let append = tokio::time::timeout(
                timeout,
                self.log.append(&self.config.instance_key, &event),
            );
            tokio::pin!(append);

            loop {
                tokio::select! {
                    biased;
                    outcome = &mut append => break outcome,
                    command = self.inbox.recv(), if self.inbox_open => match command {
                        Some(command) => {
                            debug!(command = command.name(), "append in flight, stashing");
                            self.stash.push_back(command);
                        }
                        None => self.inbox_open = false,
                    },
                }
            }
        };

        let seq = match outcome {
            Ok(Ok(seq)) => seq,
            Ok(Err(e)) => {
                metrics::append_failures().add(1, &[KeyValue::new("kind", kind)]);
                error!(kind, error = %e, "event append failed");
                return Err(e);
            }
            Err(_) => {
                metrics::append_failures().add(1, &[KeyValue::new("kind", kind)]);
                error!(kind, ?timeout, "event append timed out");
                return Err(Error::AppendTimeout(timeout));
            }
        };

        metrics::ledger_events_appended().add(1, &[KeyValue::new("kind", kind)]);
        metrics::append_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("kind", kind)],
        );
        debug!(seq, kind, "event durable");
        self.unconfirmed = None;

        self.apply(&event);
        Ok(seq)
    }

    fn apply(&mut self, event: &LedgerEvent) {
        let (from, to) = event.transition();
        let key = &self.config.instance_key;
        match event.job_id() {
            Some(job_id) => record_state_transition(&start_job_span(key, job_id), from, to),
            None => {
                for job in self.ledger.in_progress() {
                    record_state_transition(&start_job_span(key, &job.id), from, to);
                }
            }
        }
        self.ledger = std::mem::take(&mut self.ledger).apply(event);
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            instance_key: self.config.instance_key.clone(),
            pending: self.ledger.pending_count(),
            in_progress: self.ledger.in_progress_count(),
            done: self.ledger.done_count(),
            workers: self.registry.len(),
            idle_workers: self.registry.idle_count(),
            restarts: self.restarts.total(),
        }
    }
}
