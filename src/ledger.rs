//! The work ledger: a pure fold over [`LedgerEvent`]s.
//!
//! The ledger records which jobs are pending, in progress, or done. It does
//! no I/O. Folding the same event sequence from [`Ledger::default`] always
//! yields an equal ledger.
//!
//! Invariant: a job id is a member of at most one of pending, in progress,
//! and done. Events that would break it are not admitted and fold as no-ops.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::event::LedgerEvent;
use crate::model::{Job, JobId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    /// Jobs awaiting assignment, oldest first.
    pending: VecDeque<Job>,
    /// Ids in `pending`, for membership checks.
    pending_ids: BTreeSet<JobId>,
    /// Jobs currently handed to a worker.
    in_progress: BTreeMap<JobId, Job>,
    /// Jobs with a recorded result.
    done: BTreeSet<JobId>,
}

impl Ledger {
    /// Fold a sequence of events into an empty ledger.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a LedgerEvent>) -> Self {
        events
            .into_iter()
            .fold(Self::default(), |ledger, event| ledger.apply(event))
    }

    /// True if the job is known anywhere in the ledger.
    pub fn is_accepted(&self, id: &JobId) -> bool {
        self.is_pending(id) || self.is_in_progress(id) || self.is_done(id)
    }

    pub fn is_pending(&self, id: &JobId) -> bool {
        self.pending_ids.contains(id)
    }

    pub fn is_in_progress(&self, id: &JobId) -> bool {
        self.in_progress.contains_key(id)
    }

    pub fn is_done(&self, id: &JobId) -> bool {
        self.done.contains(id)
    }

    /// True if some job is waiting for a worker.
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The job to hand out next. It stays pending until a `WorkStarted`
    /// event for it is applied.
    pub fn next_work(&self) -> Option<&Job> {
        self.pending.front()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Job> {
        self.pending.iter()
    }

    pub fn in_progress(&self) -> impl Iterator<Item = &Job> {
        self.in_progress.values()
    }

    pub fn done(&self) -> impl Iterator<Item = &JobId> {
        self.done.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    pub fn done_count(&self) -> usize {
        self.done.len()
    }

    /// Would applying `event` change the ledger?
    pub fn admits(&self, event: &LedgerEvent) -> bool {
        match event {
            LedgerEvent::WorkAccepted { job } => !self.is_accepted(&job.id),
            LedgerEvent::WorkStarted { job_id } => self.is_pending(job_id),
            LedgerEvent::WorkCompleted { job_id, .. }
            | LedgerEvent::WorkerFailed { job_id }
            | LedgerEvent::WorkerTimedOut { job_id } => self.is_in_progress(job_id),
            LedgerEvent::WorkInProgressReset => !self.in_progress.is_empty(),
        }
    }

    /// Return the ledger with `event` folded in.
    ///
    /// Events not admitted by the current ledger leave it unchanged.
    #[must_use]
    pub fn apply(mut self, event: &LedgerEvent) -> Self {
        if !self.admits(event) {
            return self;
        }

        match event {
            LedgerEvent::WorkAccepted { job } => {
                self.enqueue(job.clone());
            }
            LedgerEvent::WorkStarted { job_id } => {
                // Usually the head.
                if let Some(pos) = self.pending.iter().position(|job| &job.id == job_id) {
                    if let Some(job) = self.pending.remove(pos) {
                        self.pending_ids.remove(&job.id);
                        self.in_progress.insert(job.id.clone(), job);
                    }
                }
            }
            LedgerEvent::WorkCompleted { job_id, .. } => {
                self.in_progress.remove(job_id);
                self.done.insert(job_id.clone());
            }
            LedgerEvent::WorkerFailed { job_id } | LedgerEvent::WorkerTimedOut { job_id } => {
                if let Some(job) = self.in_progress.remove(job_id) {
                    self.enqueue(job);
                }
            }
            LedgerEvent::WorkInProgressReset => {
                // Id order.
                let stranded = std::mem::take(&mut self.in_progress);
                for job in stranded.into_values() {
                    self.enqueue(job);
                }
            }
        }

        self
    }

    fn enqueue(&mut self, job: Job) {
        self.pending_ids.insert(job.id.clone());
        self.pending.push_back(job);
    }
}
