//! The coordinator: owns one instance key's ledger and worker registry.
//!
//! All requests go through a [`CoordinatorHandle`] into a single task that
//! processes them one at a time, so the ledger and registry need no locks.

pub mod handle;
pub mod master;
pub mod protocol;
pub mod supervisor;

pub use handle::CoordinatorHandle;
pub use master::Coordinator;
pub use protocol::CoordinatorStatus;
pub use supervisor::{RestartPolicy, RestartWindow};

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for one coordinator instance.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Selects the event stream this coordinator owns (e.g. a role name).
    pub instance_key: String,
    /// How long a worker may hold a job before it is presumed lost.
    pub work_timeout: Duration,
    /// Upper bound on a single event log append.
    pub append_timeout: Duration,
    /// Capacity of the request channel feeding the coordinator.
    pub inbox_capacity: usize,
    pub restart: RestartPolicy,
}

impl CoordinatorConfig {
    pub fn new(instance_key: impl Into<String>) -> Self {
        Self {
            instance_key: instance_key.into(),
            ..Self::default()
        }
    }

    pub fn work_timeout(mut self, timeout: Duration) -> Self {
        self.work_timeout = timeout;
        self
    }

    pub fn append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Check the values a coordinator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero work timeout, append timeout, or
    /// inbox capacity.
    pub fn validate(&self) -> Result<()> {
        if self.work_timeout.is_zero() {
            return Err(Error::Config("work timeout must be positive".to_string()));
        }
        if self.append_timeout.is_zero() {
            return Err(Error::Config("append timeout must be positive".to_string()));
        }
        if self.inbox_capacity == 0 {
            return Err(Error::Config("inbox capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Timeout sweeps run at half the work timeout.
    pub fn sweep_interval(&self) -> Duration {
        (self.work_timeout / 2).max(Duration::from_millis(1))
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance_key: "backend".to_string(),
            work_timeout: Duration::from_secs(10),
            append_timeout: Duration::from_secs(5),
            inbox_capacity: 1024,
            restart: RestartPolicy::default(),
        }
    }
}
