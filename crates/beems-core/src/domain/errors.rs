//! Error taxonomy of the dispatch layer.
//!
//! - [`ValidationError`]: raised at the call site, before the queue is touched.
//! - [`RoutingError`]: raised inside the processing callback when a job cannot be
//!   matched to a handler. Recorded by the engine as a job failure.
//! - [`HandlerError`]: raised by handler code. Recorded as a job failure and
//!   subject to the engine's retry policy.
//! - [`EngineError`]: raised by the queue engine itself (storage, lifecycle).

use thiserror::Error;

use super::ids::JobId;
use super::names::ServiceName;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid service name: {0:?}")]
    InvalidServiceName(String),

    #[error("invalid method name: {0:?}")]
    InvalidMethodName(String),

    #[error("method name {0:?} starts with the reserved prefix '_'")]
    ReservedMethodName(String),

    #[error("invalid payload: expected an object, got {0}")]
    InvalidPayload(&'static str),

    #[error("invalid job option {key:?}: {reason}")]
    InvalidJobOption { key: String, reason: String },

    #[error("invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("service not accepted: {0}")]
    ServiceNotAccepted(ServiceName),

    #[error("service not started: {0}")]
    ServiceNotStarted(ServiceName),

    #[error("service {0} is already bound to a queue with different settings")]
    IncompatibleHandle(ServiceName),
}

impl ValidationError {
    pub(crate) fn job_option(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidJobOption {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// A job could not be matched to a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("job payload has no routing tag")]
    MissingTag,

    #[error("invalid routing tag {0:?}")]
    InvalidTag(String),

    #[error("no handler for {service}.{method}")]
    HandlerNotFound { service: ServiceName, method: String },
}

/// Error raised by handler code.
///
/// Only the message travels through the queue; the source is kept for local
/// logging.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap any error, keeping its `Display` output as the message.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("queue {0} is closed")]
    Closed(ServiceName),

    #[error("queue {0} is not a worker queue and cannot process jobs")]
    NotWorker(ServiceName),

    #[error("queue {0} is already processing jobs")]
    AlreadyProcessing(ServiceName),

    #[error("job {id} already exists in queue {service}")]
    DuplicateJobId { service: ServiceName, id: JobId },

    #[error("queue backend failure: {0}")]
    Backend(String),
}
