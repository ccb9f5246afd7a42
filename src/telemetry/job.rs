//! Job span helpers.
//!
//! Each ledger transition is recorded as an event on a short-lived span
//! carrying the instance key and the job id.

use tracing::Span;

use crate::model::JobId;

/// Span for one job of one coordinator instance.
pub fn start_job_span(instance_key: &str, job_id: &JobId) -> Span {
    tracing::info_span!(
        "job.transition",
        "coordinator.instance_key" = instance_key,
        "job.id" = %job_id,
    )
}

/// Record a ledger stage change (e.g. "pending" -> "in_progress") on `span`.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::debug!(from, to, "job.state_transition");
    });
}
