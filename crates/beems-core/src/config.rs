//! Configuration shared by [`Client`](crate::Client) and [`Server`](crate::Server).
//!
//! ```json
//! {
//!   "bee": { "prefix": "bq", "removeOnSuccess": false },
//!   "job": { "retries": 2, "backoff": ["fixed", 1000] },
//!   "logging": { "level": "info" },
//!   "routing": "method"
//! }
//! ```
//! Every section is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{JobOptions, RoutingFormat};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Settings passed to the queue engine for every handle. The worker flag
    /// is overridden per role.
    pub bee: QueueSettings,

    /// Job options used when a call does not pass its own.
    pub job: JobOptions,

    #[serde(alias = "pino")]
    pub logging: LoggingConfig,

    /// How the client writes the routing tag.
    pub routing: RoutingFormat,
}

impl Options {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Queue engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueSettings {
    /// Namespace of the queue's keys in the shared store.
    pub prefix: String,

    /// Whether the handle may process jobs.
    pub is_worker: bool,

    /// Drop a job's record once it succeeds.
    pub remove_on_success: bool,

    /// Drop a job's record once it fails for good.
    pub remove_on_failure: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            prefix: "bq".to_string(),
            is_worker: true,
            remove_on_success: false,
            remove_on_failure: false,
        }
    }
}

impl QueueSettings {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn worker(mut self) -> Self {
        self.is_worker = true;
        self
    }

    pub fn producer(mut self) -> Self {
        self.is_worker = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level (`error`, `warn`, `info`, `debug`, `trace`) or a full
    /// `EnvFilter` directive. `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "error".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
}
