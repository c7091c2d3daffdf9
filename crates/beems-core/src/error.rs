use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::{EngineError, Job, JobFailure, ServiceName, ValidationError};

/// Errors surfaced by [`Client`](crate::Client) and [`Server`](crate::Server).
#[derive(Debug, Error)]
pub enum BeemsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The job reached its failed state. Carries the job as it was when it
    /// failed.
    #[error("job {} on service {service} failed: {failure}", job.id)]
    JobFailed {
        service: ServiceName,
        job: Box<Job>,
        failure: JobFailure,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BeemsError {
    /// The failure of a job, when this error is one.
    pub fn job_failure(&self) -> Option<&JobFailure> {
        match self {
            BeemsError::JobFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

pub type Result<T, E = BeemsError> = std::result::Result<T, E>;
