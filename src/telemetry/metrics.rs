//! Metric instrument factories for workmaster.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workmaster"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("workmaster")
}

/// Counter: job submissions.
/// Labels: `result` ("accepted" | "duplicate").
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("workmaster.jobs.submitted")
        .with_description("Number of job submissions")
        .build()
}

/// Counter: ledger events made durable.
/// Labels: `kind`.
pub fn ledger_events_appended() -> Counter<u64> {
    meter()
        .u64_counter("workmaster.ledger.events_appended")
        .with_description("Number of ledger events appended to the event log")
        .build()
}

/// Counter: failed or timed-out event log appends.
/// Labels: `kind`.
pub fn append_failures() -> Counter<u64> {
    meter()
        .u64_counter("workmaster.ledger.append_failures")
        .with_description("Number of event log appends that failed or timed out")
        .build()
}

/// Histogram: event log append latency in milliseconds.
/// Labels: `kind`.
pub fn append_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workmaster.ledger.append_duration_ms")
        .with_description("Event log append latency in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: worker done/failed reports.
/// Labels: `outcome` ("done" | "failed" | "redundant" | "stale").
pub fn worker_reports() -> Counter<u64> {
    meter()
        .u64_counter("workmaster.workers.reports")
        .with_description("Number of worker completion and failure reports")
        .build()
}

/// Counter: assignments that passed their deadline.
pub fn workers_timed_out() -> Counter<u64> {
    meter()
        .u64_counter("workmaster.workers.timed_out")
        .with_description("Number of workers whose assignment timed out")
        .build()
}

/// Counter: result announcements.
/// Labels: `status` ("ok" | "error").
pub fn results_announced() -> Counter<u64> {
    meter()
        .u64_counter("workmaster.results.announced")
        .with_description("Number of completed job results announced")
        .build()
}

/// Counter: coordinator restarts granted by the restart policy.
/// Labels: `instance_key`.
pub fn coordinator_restarts() -> Counter<u64> {
    meter()
        .u64_counter("workmaster.coordinator.restarts")
        .with_description("Number of coordinator restarts")
        .build()
}

/// Counter: pgmq operations (create, send, read, archive).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("workmaster.queue.operations")
        .with_description("Number of queue operations")
        .build()
}
