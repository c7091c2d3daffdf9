//! Lifecycle events published by a queue handle.

use serde_json::Value;

use super::ids::JobId;
use super::job::Job;
use super::outcome::JobFailure;

/// Events a queue publishes to its subscribers.
///
/// Purely observational: nothing in the dispatch path depends on them.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// The engine itself hit an error (storage, connectivity).
    Error { message: String },
    /// A job finished successfully.
    Succeeded { job: Job, result: Value },
    /// A job failed with no retries left.
    Failed { job: Job, failure: JobFailure },
    /// A job failed and was scheduled for another attempt.
    Retrying { job: Job, failure: JobFailure },
    /// A worker stopped while running the job; the job was picked back up.
    Stalled { job_id: JobId },
    /// A handler reported progress.
    Progress { job_id: JobId, progress: u8 },
}

impl QueueEvent {
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Error { .. } => "error",
            QueueEvent::Succeeded { .. } => "succeeded",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Retrying { .. } => "retrying",
            QueueEvent::Stalled { .. } => "stalled",
            QueueEvent::Progress { .. } => "progress",
        }
    }
}
