//! QueueEngine port - the external job queue.
//!
//! Everything about storage, dequeueing, retries, backoff timers, timeouts and
//! stalled-job detection lives behind these traits. The dispatch layer only
//! creates jobs, installs a processing callback and reads counts.
//!
//! # Completion
//! `save` returns a [`JobHandle`] whose completion channel is registered
//! together with the job, so a caller awaiting [`JobHandle::wait`] cannot miss
//! a job that finishes quickly. The engine fulfils it once, with the first
//! terminal outcome.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use crate::config::QueueSettings;
use crate::domain::{
    EngineError, FailureKind, HealthCounters, Job, JobFailure, JobId, JobOutcome, NewJob,
    Payload, QueueEvent, ServiceName,
};

/// Creates queue handles.
///
/// Two handles created with the same name and prefix talk to the same queue,
/// whichever engine instance or process created them.
#[async_trait]
pub trait QueueEngine: Send + Sync {
    async fn create(
        &self,
        name: &ServiceName,
        settings: &QueueSettings,
    ) -> Result<Arc<dyn QueueHandle>, EngineError>;
}

/// One connection to one named queue.
#[async_trait]
pub trait QueueHandle: Send + Sync {
    fn name(&self) -> &ServiceName;

    fn settings(&self) -> &QueueSettings;

    /// Resolves once the handle can be used.
    async fn ready(&self) -> Result<(), EngineError>;

    /// Persist a job. Returns once the job is stored.
    async fn save(&self, job: NewJob) -> Result<JobHandle, EngineError>;

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, EngineError>;

    /// Start processing jobs with up to `concurrency` in flight.
    async fn process(
        &self,
        concurrency: usize,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<(), EngineError>;

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;

    async fn check_health(&self) -> Result<HealthCounters, EngineError>;

    /// Stop taking new jobs and wait for in-flight ones. Idempotent.
    async fn close(&self) -> Result<(), EngineError>;

    /// Remove everything stored for this queue.
    async fn destroy(&self) -> Result<(), EngineError>;
}

/// Per-job processing callback installed by a worker.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, ctx: JobContext) -> Result<Value, JobFailure>;
}

/// Receives progress reports for running jobs.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, job_id: &JobId, progress: u8);
}

/// What a processing callback gets for one job.
#[derive(Clone)]
pub struct JobContext {
    job: Job,
    progress: Arc<dyn ProgressSink>,
}

impl JobContext {
    pub fn new(job: Job, progress: Arc<dyn ProgressSink>) -> Self {
        Self { job, progress }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn data(&self) -> &Payload {
        &self.job.data
    }

    /// Report progress in percent; values above 100 are clamped.
    pub async fn report_progress(&self, progress: u8) {
        self.progress.report(&self.job.id, progress.min(100)).await;
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext").field("job", &self.job).finish_non_exhaustive()
    }
}

/// A saved job plus the channel its outcome arrives on.
#[derive(Debug)]
pub struct JobHandle {
    job: Job,
    completion: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn new(job: Job, completion: oneshot::Receiver<JobOutcome>) -> Self {
        Self { job, completion }
    }

    /// Snapshot taken when the job was saved.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    /// Wait for the job to succeed or fail for good.
    ///
    /// Never times out by itself; use the job's `timeout` option. If the queue
    /// is torn down first the outcome is a failure of kind `engine`.
    pub async fn wait(self) -> JobOutcome {
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome::Failed {
                job: self.job,
                failure: JobFailure::new(
                    FailureKind::Engine,
                    "queue was shut down before the job finished",
                ),
            },
        }
    }
}
