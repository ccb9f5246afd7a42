//! Bounded restart policy for coordinator incarnations.
//!
//! A failed incarnation (log replay failure, append failure or timeout) is
//! restarted with a full replay, at most `max_restarts` times within any
//! rolling `within` window. Beyond that the coordinator stops for good.
//! The pause before a restart doubles with each restart still in the window,
//! up to `max_backoff`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub within: Duration,
    /// Pause before the first restart in a window.
    pub backoff: Duration,
    /// Ceiling for the doubled pause.
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            within: Duration::from_secs(60),
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Rolling record of recent restarts under a [`RestartPolicy`].
#[derive(Debug)]
pub struct RestartWindow {
    policy: RestartPolicy,
    recent: VecDeque<Instant>,
    total: u32,
}

impl RestartWindow {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            recent: VecDeque::new(),
            total: 0,
        }
    }

    /// Record a restart at `now` if the budget allows it.
    pub fn permit(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) >= self.policy.within {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        if self.recent.len() >= self.policy.max_restarts as usize {
            return false;
        }
        self.recent.push_back(now);
        self.total += 1;
        true
    }

    /// Pause before the restart just permitted: `backoff` doubled once per
    /// earlier restart still in the window, capped at `max_backoff`.
    pub fn backoff(&self) -> Duration {
        let doublings = self.recent.len().saturating_sub(1).min(31) as u32;
        self.policy
            .backoff
            .saturating_mul(1u32 << doublings)
            .min(self.policy.max_backoff)
    }

    /// Restarts granted since creation.
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }
}
