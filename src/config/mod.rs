//! Typed configuration.
//!
//! Process-level settings come from environment variables, loaded once at
//! startup, failing fast if required vars are missing. Coordinator tuning can
//! additionally be read from a TOML file.

use std::path::Path;
use std::time::Duration;

use crate::coordinator::{CoordinatorConfig, RestartPolicy};
use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Selects the event stream this process coordinates (e.g. a role name).
    pub instance_key: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            instance_key: required_var("INSTANCE_KEY")?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Contents of a settings file.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
}

/// `[coordinator]` table. Missing keys take their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub work_timeout_secs: u64,
    pub append_timeout_ms: u64,
    pub inbox_capacity: usize,
    pub max_restarts: u32,
    pub restart_window_secs: u64,
    pub restart_backoff_ms: u64,
    pub restart_max_backoff_ms: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            work_timeout_secs: 10,
            append_timeout_ms: 5_000,
            inbox_capacity: 1024,
            max_restarts: 5,
            restart_window_secs: 60,
            restart_backoff_ms: 500,
            restart_max_backoff_ms: 10_000,
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad settings: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Coordinator configuration for `instance_key` under these settings.
    ///
    /// Zero timeouts or a zero inbox capacity are rejected.
    pub fn coordinator_config(&self, instance_key: impl Into<String>) -> Result<CoordinatorConfig> {
        let c = &self.coordinator;
        let config = CoordinatorConfig {
            instance_key: instance_key.into(),
            work_timeout: Duration::from_secs(c.work_timeout_secs),
            append_timeout: Duration::from_millis(c.append_timeout_ms),
            inbox_capacity: c.inbox_capacity,
            restart: RestartPolicy {
                max_restarts: c.max_restarts,
                within: Duration::from_secs(c.restart_window_secs),
                backoff: Duration::from_millis(c.restart_backoff_ms),
                max_backoff: Duration::from_millis(c.restart_max_backoff_ms),
            },
        };
        config.validate()?;
        Ok(config)
    }
}
