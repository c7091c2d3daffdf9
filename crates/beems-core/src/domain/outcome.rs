//! Terminal results of a job.
//!
//! The engine resolves every saved job with exactly one [`JobOutcome`]; the
//! dispatcher hands it back to whoever awaited the job.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{HandlerError, RoutingError};
use super::job::Job;

/// Where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler returned an error.
    Handler,
    /// The routing tag did not resolve to a handler.
    Routing,
    /// The job ran longer than its `timeout`.
    Timeout,
    /// The worker died while running the job too many times.
    Stalled,
    /// The queue went away before the job finished.
    Engine,
}

/// Failure recorded for a job.
///
/// Only the message crosses the queue, like an error stored next to a job in
/// Redis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(FailureKind::Timeout, "Operation timed out")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<HandlerError> for JobFailure {
    fn from(err: HandlerError) -> Self {
        Self::new(FailureKind::Handler, err.message())
    }
}

impl From<RoutingError> for JobFailure {
    fn from(err: RoutingError) -> Self {
        Self::new(FailureKind::Routing, err.to_string())
    }
}

/// Final state of a job, with the job snapshot taken when it finished.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { job: Job, result: Value },
    Failed { job: Job, failure: JobFailure },
}

impl JobOutcome {
    pub fn job(&self) -> &Job {
        match self {
            JobOutcome::Succeeded { job, .. } | JobOutcome::Failed { job, .. } => job,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ServiceName;

    #[test]
    fn handler_error_becomes_handler_failure() {
        let failure = JobFailure::from(HandlerError::new("boom"));
        assert_eq!(failure.kind, FailureKind::Handler);
        assert_eq!(failure.message(), "boom");
        assert_eq!(failure.to_string(), "boom");
    }

    #[test]
    fn routing_error_becomes_routing_failure() {
        let failure = JobFailure::from(RoutingError::HandlerNotFound {
            service: ServiceName::new("calc").unwrap(),
            method: "nope".into(),
        });
        assert_eq!(failure.kind, FailureKind::Routing);
        assert!(failure.message.contains("calc.nope"));
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let s = serde_json::to_string(&FailureKind::Timeout).unwrap();
        assert_eq!(s, "\"timeout\"");
    }
}
