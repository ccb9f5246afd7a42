//! Integration tests for the coordinator protocol.

use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use workmaster::announce::{Announcement, BroadcastAnnouncer};
use workmaster::coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle};
use workmaster::error::{Error, Result};
use workmaster::event::LedgerEvent;
use workmaster::log::MemoryEventLog;
use workmaster::model::{Ack, Job, JobId};
use workmaster::registry::WorkerNotice;

const KEY: &str = "backend";

struct Harness {
    handle: CoordinatorHandle,
    log: MemoryEventLog,
    results: broadcast::Receiver<Announcement>,
    _task: JoinHandle<Result<()>>,
}

fn start_with(log: MemoryEventLog) -> Harness {
    let announcer = BroadcastAnnouncer::new(64);
    let results = announcer.subscribe();
    let (handle, task) =
        Coordinator::spawn(CoordinatorConfig::new(KEY), log.clone(), announcer).unwrap();
    Harness {
        handle,
        log,
        results,
        _task: task,
    }
}

fn start() -> Harness {
    start_with(MemoryEventLog::new())
}

async fn event_kinds(log: &MemoryEventLog) -> Vec<&'static str> {
    log.events(KEY)
        .await
        .iter()
        .map(|stored| stored.event.kind())
        .collect()
}

fn ack(id: &str) -> Ack {
    Ack {
        job_id: JobId::from(id),
    }
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_assign_complete_and_resubmit() {
    let mut h = start();

    let first_ack = h.handle.submit(Job::new("j1", json!({"x": 1}))).await.unwrap();
    assert_eq!(first_ack, ack("j1"));
    let status = h.handle.status().await.unwrap();
    assert_eq!((status.pending, status.in_progress, status.done), (1, 0, 0));

    let mut notices = h.handle.register_worker("w1").await.unwrap();
    assert_eq!(notices.recv().await, Some(WorkerNotice::WorkIsReady));

    let job = h.handle.request_work("w1").await.unwrap().expect("j1 delivered");
    assert_eq!(job.id, JobId::from("j1"));
    assert_eq!(job.payload, json!({"x": 1}));
    let status = h.handle.status().await.unwrap();
    assert_eq!((status.pending, status.in_progress, status.done), (0, 1, 0));
    assert_eq!(status.idle_workers, 0);

    let done_ack = h.handle.report_done("w1", "j1", json!("R")).await.unwrap();
    assert_eq!(done_ack, ack("j1"));

    let announced = h.results.recv().await.unwrap();
    assert_eq!(announced.job_id, JobId::from("j1"));
    assert_eq!(announced.result, json!("R"));

    let status = h.handle.status().await.unwrap();
    assert_eq!((status.pending, status.in_progress, status.done), (0, 0, 1));
    assert_eq!(status.idle_workers, 1);

    // Resubmission after completion: same ack, ledger untouched.
    let again = h.handle.submit(Job::new("j1", json!({"x": 1}))).await.unwrap();
    assert_eq!(again, first_ack);
    assert_eq!(
        event_kinds(&h.log).await,
        ["work_accepted", "work_started", "work_completed"]
    );
    assert!(h.results.try_recv().is_err(), "result announced twice");
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_submission_records_one_event() {
    let h = start();

    let mut acks = Vec::new();
    for _ in 0..5 {
        acks.push(h.handle.submit(Job::new("dup", json!(null))).await.unwrap());
    }

    assert!(acks.iter().all(|a| *a == ack("dup")));
    assert_eq!(event_kinds(&h.log).await, ["work_accepted"]);
    assert_eq!(h.handle.status().await.unwrap().pending, 1);
}

#[tokio::test]
async fn repeated_completion_reports_are_reacknowledged_once_announced() {
    let mut h = start();
    h.handle.submit(Job::new("j1", json!(1))).await.unwrap();
    let _notices = h.handle.register_worker("w1").await.unwrap();
    h.handle.request_work("w1").await.unwrap().expect("job");

    for _ in 0..4 {
        let a = h.handle.report_done("w1", "j1", json!("R")).await.unwrap();
        assert_eq!(a, ack("j1"));
    }

    assert_eq!(
        event_kinds(&h.log).await,
        ["work_accepted", "work_started", "work_completed"]
    );
    assert!(h.results.recv().await.is_ok());
    assert!(h.results.try_recv().is_err(), "result announced twice");
}

// ---------------------------------------------------------------------------
// Failure and stale reports
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_requeues_once_and_frees_the_worker() {
    let h = start();
    h.handle.submit(Job::new("j1", json!(1))).await.unwrap();
    let mut notices = h.handle.register_worker("w1").await.unwrap();
    assert_eq!(notices.recv().await, Some(WorkerNotice::WorkIsReady));
    h.handle.request_work("w1").await.unwrap().expect("job");

    h.handle.report_failed("w1", "j1").await.unwrap();
    let status = h.handle.status().await.unwrap();
    assert_eq!((status.pending, status.in_progress), (1, 0));
    assert_eq!(status.idle_workers, 1);

    // The freed worker hears that work is available again.
    assert_eq!(notices.recv().await, Some(WorkerNotice::WorkIsReady));

    // A second failure report for a job no longer in progress is a no-op.
    h.handle.report_failed("w1", "j1").await.unwrap();
    h.handle.status().await.unwrap();
    assert_eq!(
        event_kinds(&h.log).await,
        ["work_accepted", "work_started", "worker_failed"]
    );

    let retry = h.handle.request_work("w1").await.unwrap().expect("retry");
    assert_eq!(retry.id, JobId::from("j1"));
}

#[tokio::test]
async fn stale_completion_is_dropped_without_ack() {
    let h = start();
    h.handle.submit(Job::new("j1", json!(1))).await.unwrap();
    let _notices = h.handle.register_worker("w1").await.unwrap();
    h.handle.request_work("w1").await.unwrap().expect("job");
    h.handle.report_failed("w1", "j1").await.unwrap();

    let result = h.handle.report_done("w1", "j1", json!("late")).await;
    assert!(matches!(result, Err(Error::Unacknowledged)));

    let status = h.handle.status().await.unwrap();
    assert_eq!((status.pending, status.done), (1, 0));
}

#[tokio::test]
async fn completion_for_unknown_job_is_dropped() {
    let h = start();
    let result = h.handle.report_done("w1", "ghost", json!(null)).await;
    assert!(matches!(result, Err(Error::Unacknowledged)));
    assert!(event_kinds(&h.log).await.is_empty());
}

// ---------------------------------------------------------------------------
// Work requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_without_pending_work_gets_nothing() {
    let h = start();
    let _notices = h.handle.register_worker("w1").await.unwrap();
    assert!(h.handle.request_work("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn request_from_unknown_worker_is_ignored() {
    let h = start();
    h.handle.submit(Job::new("j1", json!(1))).await.unwrap();

    assert!(h.handle.request_work("stranger").await.unwrap().is_none());
    assert_eq!(h.handle.status().await.unwrap().pending, 1);
    assert_eq!(event_kinds(&h.log).await, ["work_accepted"]);
}

#[tokio::test]
async fn busy_worker_cannot_take_a_second_job() {
    let h = start();
    h.handle.submit(Job::new("j1", json!(1))).await.unwrap();
    h.handle.submit(Job::new("j2", json!(2))).await.unwrap();
    let _notices = h.handle.register_worker("w1").await.unwrap();

    let first = h.handle.request_work("w1").await.unwrap().expect("job");
    assert_eq!(first.id, JobId::from("j1"));
    assert!(h.handle.request_work("w1").await.unwrap().is_none());
    assert_eq!(h.handle.status().await.unwrap().pending, 1);
}

#[tokio::test]
async fn jobs_are_handed_out_in_submission_order() {
    let h = start();
    for id in ["a", "b", "c"] {
        h.handle.submit(Job::new(id, json!(null))).await.unwrap();
    }
    let _notices = h.handle.register_worker("w1").await.unwrap();

    let mut order = Vec::new();
    for _ in 0..3 {
        let job = h.handle.request_work("w1").await.unwrap().expect("job");
        order.push(job.id.to_string());
        h.handle
            .report_done("w1", job.id.clone(), json!(null))
            .await
            .unwrap();
    }
    assert_eq!(order, ["a", "b", "c"]);
}

#[tokio::test]
async fn idle_workers_race_and_only_one_wins() {
    let h = start();
    let mut w1 = h.handle.register_worker("w1").await.unwrap();
    let mut w2 = h.handle.register_worker("w2").await.unwrap();

    h.handle.submit(Job::new("j1", json!(1))).await.unwrap();
    assert_eq!(w1.recv().await, Some(WorkerNotice::WorkIsReady));
    assert_eq!(w2.recv().await, Some(WorkerNotice::WorkIsReady));

    let (a, b) = tokio::join!(h.handle.request_work("w1"), h.handle.request_work("w2"));
    let delivered = [a.unwrap(), b.unwrap()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    assert_eq!(delivered.len(), 1);
    assert_eq!(event_kinds(&h.log).await, ["work_accepted", "work_started"]);
}

#[tokio::test]
async fn reregistration_replaces_the_channel_and_keeps_busy_state() {
    let h = start();
    h.handle.submit(Job::new("j1", json!(1))).await.unwrap();
    let mut old = h.handle.register_worker("w1").await.unwrap();
    assert_eq!(old.recv().await, Some(WorkerNotice::WorkIsReady));
    h.handle.request_work("w1").await.unwrap().expect("job");

    let _new = h.handle.register_worker("w1").await.unwrap();
    let status = h.handle.status().await.unwrap();
    assert_eq!(status.workers, 1);
    assert_eq!(status.idle_workers, 0);

    // The replaced channel's sender is gone.
    assert_eq!(old.recv().await, None);
}

// ---------------------------------------------------------------------------
// Ordering while an append is in flight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn requests_during_an_append_are_processed_in_order_after_it() {
    let log = MemoryEventLog::new().with_append_delay(Duration::from_millis(30));
    let h = start_with(log);
    let _notices = h.handle.register_worker("w1").await.unwrap();

    let (a1, a2, delivered, a3) = tokio::join!(
        h.handle.submit(Job::new("j1", json!(1))),
        h.handle.submit(Job::new("j1", json!(1))),
        h.handle.request_work("w1"),
        h.handle.submit(Job::new("j2", json!(2))),
    );

    assert_eq!(a1.unwrap(), ack("j1"));
    assert_eq!(a2.unwrap(), ack("j1"));
    assert_eq!(a3.unwrap(), ack("j2"));
    assert_eq!(delivered.unwrap().map(|job| job.id), Some(JobId::from("j1")));

    let events = h.log.events(KEY).await;
    let ids: Vec<_> = events
        .iter()
        .map(|stored| (stored.event.kind(), stored.event.job_id().cloned()))
        .collect();
    assert_eq!(
        ids,
        [
            ("work_accepted", Some(JobId::from("j1"))),
            ("work_started", Some(JobId::from("j1"))),
            ("work_accepted", Some(JobId::from("j2"))),
        ]
    );

    let seqs: Vec<_> = events.iter().map(|stored| stored.seq).collect();
    assert_eq!(seqs, [1, 2, 3]);
}

#[tokio::test]
async fn coordinators_with_different_keys_do_not_share_state() {
    let log = MemoryEventLog::new();
    let announcer = BroadcastAnnouncer::new(8);
    let (a, _ta) = Coordinator::spawn(
        CoordinatorConfig::new("role-a"),
        log.clone(),
        announcer.clone(),
    )
    .unwrap();
    let (b, _tb) =
        Coordinator::spawn(CoordinatorConfig::new("role-b"), log.clone(), announcer).unwrap();

    a.submit(Job::new("j1", json!(1))).await.unwrap();
    b.submit(Job::new("j1", json!(1))).await.unwrap();
    b.submit(Job::new("j2", json!(2))).await.unwrap();

    assert_eq!(a.status().await.unwrap().pending, 1);
    assert_eq!(b.status().await.unwrap().pending, 2);
    assert_eq!(log.events("role-a").await.len(), 1);
    assert_eq!(log.events("role-b").await.len(), 2);
}

#[tokio::test]
async fn unusable_config_is_rejected_before_spawning() {
    let zero_inbox = CoordinatorConfig {
        inbox_capacity: 0,
        ..CoordinatorConfig::new(KEY)
    };
    let spawned = Coordinator::spawn(
        zero_inbox,
        MemoryEventLog::new(),
        BroadcastAnnouncer::new(8),
    );
    assert!(matches!(spawned, Err(Error::Config(_))));

    let zero_append = CoordinatorConfig::new(KEY).append_timeout(Duration::ZERO);
    let spawned = Coordinator::spawn(
        zero_append,
        MemoryEventLog::new(),
        BroadcastAnnouncer::new(8),
    );
    assert!(matches!(spawned, Err(Error::Config(_))));

    let zero_work = CoordinatorConfig::new(KEY).work_timeout(Duration::ZERO);
    assert!(zero_work.validate().is_err());
    assert!(CoordinatorConfig::new(KEY).validate().is_ok());
}

#[tokio::test]
async fn shutdown_stops_the_coordinator() {
    let log = MemoryEventLog::new();
    let (handle, task) = Coordinator::spawn(
        CoordinatorConfig::new(KEY),
        log,
        BroadcastAnnouncer::new(8),
    )
    .unwrap();
    handle.submit(Job::new("j1", json!(1))).await.unwrap();

    handle.shutdown();
    task.await.unwrap().unwrap();

    assert!(matches!(
        handle.submit(Job::new("j2", json!(2))).await,
        Err(Error::CoordinatorStopped)
    ));
}

#[tokio::test]
async fn completed_event_carries_the_result() {
    let h = start();
    h.handle.submit(Job::new("j1", json!(1))).await.unwrap();
    let _notices = h.handle.register_worker("w1").await.unwrap();
    h.handle.request_work("w1").await.unwrap().expect("job");
    h.handle
        .report_done("w1", "j1", json!({"answer": 42}))
        .await
        .unwrap();

    let events = h.log.events(KEY).await;
    assert_eq!(
        events.last().map(|stored| &stored.event),
        Some(&LedgerEvent::WorkCompleted {
            job_id: "j1".into(),
            result: json!({"answer": 42}),
        })
    );
}
