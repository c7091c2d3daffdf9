//! Job record: snapshot + bookkeeping the engine keeps per job.

use crate::domain::{Job, JobStatus};

/// Single source of truth for one job's state.
///
/// Queue structures (waiting/delayed) hold `JobId`s only; all state
/// transitions happen through these methods.
#[derive(Debug, Clone)]
pub(super) struct JobRecord {
    pub job: Job,

    /// Times a worker died while running this job.
    pub stalls: u32,

    /// Retries consumed by failed attempts. Stalls don't count.
    pub retries_used: u32,
}

impl JobRecord {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            stalls: 0,
            retries_used: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.job.status
    }

    /// Picked up by a worker.
    pub fn start_attempt(&mut self) {
        self.job.status = JobStatus::Active;
        self.job.attempts += 1;
    }

    pub fn mark_waiting(&mut self) {
        self.job.status = JobStatus::Waiting;
    }

    pub fn mark_delayed(&mut self) {
        self.job.status = JobStatus::Delayed;
    }

    pub fn mark_succeeded(&mut self) {
        self.job.status = JobStatus::Succeeded;
        self.job.progress = 100;
    }

    pub fn mark_failed(&mut self) {
        self.job.status = JobStatus::Failed;
    }

    /// Consume one retry. Returns the retry number (1 for the first retry).
    pub fn take_retry(&mut self) -> Option<u32> {
        if self.job.options.retries == 0 {
            return None;
        }
        self.job.options.retries -= 1;
        self.retries_used += 1;
        Some(self.retries_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionOptions, JobId, ServiceName};
    use serde_json::Map;

    fn record(retries: u32) -> JobRecord {
        let job = Job {
            id: JobId::parse("1").unwrap(),
            queue: ServiceName::new("calc").unwrap(),
            data: Map::new(),
            options: ExecutionOptions {
                retries,
                ..ExecutionOptions::default()
            },
            status: JobStatus::Waiting,
            progress: 0,
            attempts: 0,
        };
        JobRecord::new(job)
    }

    #[test]
    fn start_attempt_counts_attempts() {
        let mut r = record(0);
        r.start_attempt();
        r.start_attempt();
        assert_eq!(r.status(), JobStatus::Active);
        assert_eq!(r.job.attempts, 2);
    }

    #[test]
    fn take_retry_decrements_remaining_retries() {
        let mut r = record(2);
        r.start_attempt();
        assert_eq!(r.take_retry(), Some(1));
        assert_eq!(r.job.options.retries, 1);
        r.start_attempt();
        assert_eq!(r.take_retry(), Some(2));
        assert_eq!(r.take_retry(), None);
    }

    #[test]
    fn retry_number_ignores_stalled_attempts() {
        let mut r = record(1);
        r.start_attempt();
        r.stalls += 1;
        r.start_attempt();
        assert_eq!(r.job.attempts, 2);
        assert_eq!(r.take_retry(), Some(1));
    }

    #[test]
    fn success_sets_full_progress() {
        let mut r = record(0);
        r.mark_succeeded();
        assert_eq!(r.status(), JobStatus::Succeeded);
        assert_eq!(r.job.progress, 100);
    }
}
