//! Logs a queue's lifecycle events.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::domain::{QueueEvent, ServiceName};

/// Spawn a task that logs every event of one service queue until the channel
/// closes or the task is aborted.
pub(crate) fn spawn(service: ServiceName, mut events: broadcast::Receiver<QueueEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&service, &event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(service = %service, skipped, "event listener fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub(crate) fn log_event(service: &ServiceName, event: &QueueEvent) {
    match event {
        QueueEvent::Error { message } => {
            tracing::warn!(service = %service, error = %message, "queue error");
        }
        QueueEvent::Succeeded { job, result } => {
            tracing::info!(service = %service, job_id = %job.id, "job succeeded");
            tracing::debug!(service = %service, job_id = %job.id, result = %result, "job result");
        }
        QueueEvent::Failed { job, failure } => {
            tracing::warn!(
                service = %service,
                job_id = %job.id,
                kind = ?failure.kind,
                error = %failure,
                "job failed"
            );
        }
        QueueEvent::Retrying { job, failure } => {
            tracing::info!(
                service = %service,
                job_id = %job.id,
                retries_left = job.options.retries,
                error = %failure,
                "job retrying"
            );
        }
        QueueEvent::Stalled { job_id } => {
            tracing::warn!(service = %service, job_id = %job_id, "job stalled");
        }
        QueueEvent::Progress { job_id, progress } => {
            tracing::info!(service = %service, job_id = %job_id, progress, "job progress");
        }
    }
}
