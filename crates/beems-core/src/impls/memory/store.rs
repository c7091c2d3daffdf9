//! Shared state of one named queue.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, Notify, broadcast, oneshot};

use super::record::JobRecord;
use crate::domain::{
    EngineError, FailureKind, HealthCounters, Job, JobFailure, JobId, JobOutcome, JobStatus,
    NewJob, QueueEvent, ServiceName,
};
use crate::ports::{Clock, IdGenerator, JobHandle, ProgressSink};

/// A worker that dies this many times on the same job fails it.
pub(super) const MAX_STALLS: u32 = 2;

const EVENT_CAPACITY: usize = 256;

/// Delayed job entry. Reverse ordering turns `BinaryHeap` into a min-heap
/// (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledJob {
    run_at: DateTime<Utc>,
    job_id: JobId,
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.job_id.as_str().cmp(self.job_id.as_str()))
    }
}

#[derive(Default)]
struct StoreState {
    records: HashMap<JobId, JobRecord>,
    waiting: VecDeque<JobId>,
    delayed: BinaryHeap<ScheduledJob>,
    completions: HashMap<JobId, oneshot::Sender<JobOutcome>>,
}

impl StoreState {
    /// Move delayed jobs whose time has come to the waiting list.
    fn promote_delayed(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.delayed.peek() {
            if entry.run_at > now {
                break;
            }
            let Some(entry) = self.delayed.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.job_id)
                && record.status() == JobStatus::Delayed
            {
                record.mark_waiting();
                self.waiting.push_back(entry.job_id);
            }
        }
    }

    fn schedule(&mut self, id: JobId, run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        match run_at {
            Some(run_at) if run_at > now => {
                record.mark_delayed();
                self.delayed.push(ScheduledJob { run_at, job_id: id });
            }
            _ => {
                record.mark_waiting();
                self.waiting.push_back(id);
            }
        }
    }

    /// Resolve the job's completion channel and optionally drop its record.
    fn finish(&mut self, id: &JobId, outcome: JobOutcome, remove: bool) {
        if let Some(tx) = self.completions.remove(id) {
            // The caller may have stopped waiting.
            let _ = tx.send(outcome);
        }
        if remove {
            self.records.remove(id);
        }
    }
}

/// Everything stored for one `{prefix}:{name}` queue.
///
/// Handles for the same queue share one store, the way clients and workers
/// share a Redis keyspace.
pub(super) struct QueueStore {
    name: ServiceName,
    state: Mutex<StoreState>,
    notify: Notify,
    events: broadcast::Sender<QueueEvent>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl QueueStore {
    pub fn new(name: ServiceName, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name,
            state: Mutex::new(StoreState::default()),
            notify: Notify::new(),
            events,
            clock,
            ids,
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub async fn save(&self, new_job: NewJob) -> Result<JobHandle, EngineError> {
        let now = self.clock.now();
        let (tx, rx) = oneshot::channel();

        let job = {
            let mut state = self.state.lock().await;
            let id = match new_job.id {
                Some(id) => {
                    if state.records.contains_key(&id) {
                        return Err(EngineError::DuplicateJobId {
                            service: self.name.clone(),
                            id,
                        });
                    }
                    id
                }
                None => self.ids.generate_job_id(),
            };

            let run_at = new_job.options.delay_until;
            let job = Job {
                id: id.clone(),
                queue: self.name.clone(),
                data: new_job.data,
                options: new_job.options,
                status: JobStatus::Waiting,
                progress: 0,
                attempts: 0,
            };
            state.records.insert(id.clone(), JobRecord::new(job));
            state.completions.insert(id.clone(), tx);
            state.schedule(id.clone(), run_at, now);
            state
                .records
                .get(&id)
                .map(|record| record.job.clone())
                .ok_or_else(|| EngineError::Backend(format!("job {id} vanished on save")))?
        };

        self.notify.notify_one();
        tracing::trace!(queue = %self.name, job_id = %job.id, status = job.status.as_str(), "job saved");
        Ok(JobHandle::new(job, rx))
    }

    /// Wait for the next runnable job and mark it active.
    ///
    /// Cancellation safe: a job is only taken off the waiting list in the same
    /// critical section that returns it.
    pub async fn lease(&self) -> Job {
        loop {
            let now = self.clock.now();
            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_delayed(now);

                while let Some(id) = state.waiting.pop_front() {
                    if let Some(record) = state.records.get_mut(&id)
                        && record.status() == JobStatus::Waiting
                    {
                        record.start_attempt();
                        return record.job.clone();
                    }
                }

                state.delayed.peek().map(|entry| entry.run_at)
            };

            match next_wake {
                Some(run_at) => {
                    let wait = (run_at - now).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    pub async fn succeed(&self, id: &JobId, result: Value, remove: bool) {
        let job = {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.get_mut(id) else {
                drop(state);
                self.vanished(id);
                return;
            };
            record.mark_succeeded();
            let job = record.job.clone();
            state.finish(
                id,
                JobOutcome::Succeeded {
                    job: job.clone(),
                    result: result.clone(),
                },
                remove,
            );
            job
        };
        self.emit(QueueEvent::Succeeded { job, result });
    }

    /// Record a failed attempt: retry while retries remain, fail for good
    /// otherwise.
    pub async fn fail(&self, id: &JobId, failure: JobFailure, remove: bool) {
        let now = self.clock.now();
        let event = {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.get_mut(id) else {
                drop(state);
                self.vanished(id);
                return;
            };

            match record.take_retry() {
                Some(retry) => {
                    let delay = record.job.options.backoff.next_delay(retry);
                    let run_at = (!delay.is_zero()).then(|| add_duration(now, delay));
                    let job = record.job.clone();
                    state.schedule(id.clone(), run_at, now);
                    QueueEvent::Retrying { job, failure }
                }
                None => {
                    record.mark_failed();
                    let job = record.job.clone();
                    state.finish(
                        id,
                        JobOutcome::Failed {
                            job: job.clone(),
                            failure: failure.clone(),
                        },
                        remove,
                    );
                    QueueEvent::Failed { job, failure }
                }
            }
        };

        if matches!(event, QueueEvent::Retrying { .. }) {
            self.notify.notify_one();
        }
        self.emit(event);
    }

    /// The task running the job died. Put it back, or fail it once it has
    /// stalled too often.
    pub async fn stall(&self, id: &JobId, remove: bool) {
        let now = self.clock.now();
        self.emit(QueueEvent::Stalled { job_id: id.clone() });
        let failed = {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.get_mut(id) else {
                return;
            };
            record.stalls += 1;
            if record.stalls >= MAX_STALLS {
                let failure = JobFailure::new(
                    FailureKind::Stalled,
                    format!("job stalled {} times", record.stalls),
                );
                record.mark_failed();
                let job = record.job.clone();
                state.finish(
                    id,
                    JobOutcome::Failed {
                        job: job.clone(),
                        failure: failure.clone(),
                    },
                    remove,
                );
                Some(QueueEvent::Failed { job, failure })
            } else {
                state.schedule(id.clone(), None, now);
                None
            }
        };

        match failed {
            Some(event) => self.emit(event),
            None => self.notify.notify_one(),
        }
    }

    fn vanished(&self, id: &JobId) {
        let message = format!("job {id} was removed while it was running");
        tracing::warn!(queue = %self.name, job_id = %id, "{message}");
        self.emit(QueueEvent::Error { message });
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        let state = self.state.lock().await;
        state.records.get(id).map(|record| record.job.clone())
    }

    pub async fn health(&self) -> HealthCounters {
        let state = self.state.lock().await;
        let mut counters = HealthCounters::zeroed();
        for record in state.records.values() {
            counters.increment(record.status());
        }
        counters
    }

    /// Drop every job. Pending completions resolve as engine failures.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        *state = StoreState::default();
    }

    /// Wake every worker blocked in [`lease`](Self::lease).
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl ProgressSink for QueueStore {
    async fn report(&self, job_id: &JobId, progress: u8) {
        {
            let mut state = self.state.lock().await;
            match state.records.get_mut(job_id) {
                Some(record) if record.status() == JobStatus::Active => {
                    record.job.progress = progress;
                }
                _ => return,
            }
        }
        self.emit(QueueEvent::Progress {
            job_id: job_id.clone(),
            progress,
        });
    }
}

fn add_duration(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Backoff;
    use crate::ports::{SystemClock, UlidGenerator};
    use serde_json::{Map, json};

    fn store() -> QueueStore {
        QueueStore::new(
            ServiceName::new("calc").unwrap(),
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn save_then_lease_marks_active() {
        let store = store();
        let handle = store.save(NewJob::new(data(json!({"x": 1})))).await.unwrap();
        assert_eq!(handle.job().status, JobStatus::Waiting);

        let job = tokio::time::timeout(Duration::from_millis(100), store.lease())
            .await
            .unwrap();
        assert_eq!(&job.id, handle.id());
        assert_eq!(job.attempts, 1);

        let health = store.health().await;
        assert_eq!(health.get("active"), 1);
        assert_eq!(health.get("waiting"), 0);
    }

    #[tokio::test]
    async fn duplicate_custom_id_is_rejected() {
        let store = store();
        let id = JobId::parse("job-1").unwrap();
        store
            .save(NewJob::new(Map::new()).set_id(id.clone()))
            .await
            .unwrap();
        let err = store
            .save(NewJob::new(Map::new()).set_id(id))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateJobId { .. }));
    }

    #[tokio::test]
    async fn succeed_resolves_completion() {
        let store = store();
        let handle = store.save(NewJob::new(Map::new())).await.unwrap();
        let job = store.lease().await;
        store.succeed(&job.id, json!(42), false).await;

        let outcome = handle.wait().await;
        assert!(outcome.is_success());
        assert_eq!(store.health().await.get("succeeded"), 1);
    }

    #[tokio::test]
    async fn remove_on_success_drops_record() {
        let store = store();
        let handle = store.save(NewJob::new(Map::new())).await.unwrap();
        let job = store.lease().await;
        store.succeed(&job.id, Value::Null, true).await;

        assert!(handle.wait().await.is_success());
        assert!(store.get(&job.id).await.is_none());
    }

    #[tokio::test]
    async fn fail_with_retries_requeues_and_decrements() {
        let store = store();
        let mut events = store.subscribe();
        let handle = store.save(NewJob::new(Map::new()).retries(1)).await.unwrap();

        let job = store.lease().await;
        store.fail(&job.id, JobFailure::from(crate::domain::HandlerError::new("boom")), false).await;
        assert!(matches!(events.recv().await.unwrap(), QueueEvent::Retrying { .. }));

        let job = store.lease().await;
        assert_eq!(job.options.retries, 0);
        assert_eq!(job.attempts, 2);

        store.fail(&job.id, JobFailure::new(FailureKind::Handler, "boom"), false).await;
        match handle.wait().await {
            JobOutcome::Failed { failure, .. } => assert_eq!(failure.message(), "boom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.health().await.get("failed"), 1);
    }

    #[tokio::test]
    async fn backoff_retry_goes_through_delayed() {
        let store = store();
        store
            .save(
                NewJob::new(Map::new())
                    .retries(1)
                    .backoff(Backoff::fixed(Duration::from_millis(20))),
            )
            .await
            .unwrap();
        let job = store.lease().await;
        store.fail(&job.id, JobFailure::new(FailureKind::Handler, "x"), false).await;
        assert_eq!(store.health().await.get("delayed"), 1);

        let again = tokio::time::timeout(Duration::from_secs(1), store.lease())
            .await
            .unwrap();
        assert_eq!(again.id, job.id);
    }

    #[tokio::test]
    async fn exponential_delay_after_a_stall_starts_at_the_base() {
        let now = Utc::now();
        let clock = crate::ports::FixedClock::new(now);
        let store = QueueStore::new(
            ServiceName::new("calc").unwrap(),
            Arc::new(clock.clone()),
            Arc::new(UlidGenerator::new(clock)),
        );
        store
            .save(
                NewJob::new(Map::new())
                    .retries(1)
                    .backoff(Backoff::exponential(Duration::from_secs(1))),
            )
            .await
            .unwrap();

        let job = store.lease().await;
        store.stall(&job.id, false).await;
        let job = store.lease().await;
        assert_eq!(job.attempts, 2);
        store.fail(&job.id, JobFailure::new(FailureKind::Handler, "x"), false).await;

        let state = store.state.lock().await;
        let scheduled = state.delayed.peek().unwrap();
        assert_eq!(scheduled.run_at - now, chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn delay_until_in_the_past_is_waiting() {
        let store = store();
        let handle = store
            .save(NewJob::new(Map::new()).delay_until(Utc::now() - chrono::Duration::seconds(5)))
            .await
            .unwrap();
        assert_eq!(handle.job().status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn delay_until_in_the_future_is_delayed() {
        let store = store();
        let handle = store
            .save(NewJob::new(Map::new()).delay_until(Utc::now() + chrono::Duration::milliseconds(30)))
            .await
            .unwrap();
        assert_eq!(handle.job().status, JobStatus::Delayed);

        let job = tokio::time::timeout(Duration::from_secs(1), store.lease())
            .await
            .unwrap();
        assert_eq!(job.id, handle.job().id);
    }

    #[tokio::test]
    async fn repeated_stalls_fail_the_job() {
        let store = store();
        let handle = store.save(NewJob::new(Map::new())).await.unwrap();
        for _ in 0..MAX_STALLS {
            let job = store.lease().await;
            store.stall(&job.id, false).await;
        }
        match handle.wait().await {
            JobOutcome::Failed { failure, .. } => assert_eq!(failure.kind, FailureKind::Stalled),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_resolves_pending_waits_as_engine_failures() {
        let store = store();
        let handle = store.save(NewJob::new(Map::new())).await.unwrap();
        store.clear().await;

        match handle.wait().await {
            JobOutcome::Failed { failure, .. } => assert_eq!(failure.kind, FailureKind::Engine),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(store.health().await.total(), 0);
    }

    #[tokio::test]
    async fn progress_is_recorded_for_active_jobs_only() {
        let store = store();
        let handle = store.save(NewJob::new(Map::new())).await.unwrap();
        store.report(handle.id(), 50).await;
        assert_eq!(store.get(handle.id()).await.unwrap().progress, 0);

        store.lease().await;
        store.report(handle.id(), 50).await;
        assert_eq!(store.get(handle.id()).await.unwrap().progress, 50);
    }
}
