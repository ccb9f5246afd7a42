//! Error types for workmaster.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event log unavailable: {0}")]
    LogUnavailable(String),

    #[error("event log append timed out after {0:?}")]
    AppendTimeout(Duration),

    /// The coordinator dropped the request without replying. Callers retry.
    #[error("request was not acknowledged")]
    Unacknowledged,

    #[error("coordinator is not running")]
    CoordinatorStopped,

    #[error("restart limit exceeded: {restarts} restarts within {within:?}")]
    RestartLimitExceeded { restarts: u32, within: Duration },

    #[error("announce failed: {0}")]
    Announce(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
