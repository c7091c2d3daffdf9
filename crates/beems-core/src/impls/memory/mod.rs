//! In-memory queue engine.
//!
//! Behaves like a Redis-backed engine for a single process: handles created
//! with the same prefix and name share one store, so a client handle and a
//! worker handle see the same jobs. Delayed jobs, retries with backoff,
//! timeouts and stalled-job recovery are all handled here.

mod record;
mod store;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};

use self::store::QueueStore;
use self::worker::WorkerGroup;
use crate::config::QueueSettings;
use crate::domain::{EngineError, HealthCounters, Job, JobId, NewJob, QueueEvent, ServiceName};
use crate::ports::{
    Clock, IdGenerator, JobHandle, JobProcessor, QueueEngine, QueueHandle, SystemClock,
    UlidGenerator,
};

struct EngineInner {
    stores: parking_lot::Mutex<HashMap<String, Arc<QueueStore>>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

/// Engine whose queues live in process memory.
///
/// Cheap to clone; clones share their queues.
#[derive(Clone)]
pub struct InMemoryEngine {
    inner: Arc<EngineInner>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SystemClock), Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_parts(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                stores: parking_lot::Mutex::new(HashMap::new()),
                clock,
                ids,
            }),
        }
    }

    fn store(&self, name: &ServiceName, settings: &QueueSettings) -> Arc<QueueStore> {
        let key = format!("{}:{}", settings.prefix, name);
        let mut stores = self.inner.stores.lock();
        let store = stores.entry(key).or_insert_with(|| {
            Arc::new(QueueStore::new(
                name.clone(),
                Arc::clone(&self.inner.clock),
                Arc::clone(&self.inner.ids),
            ))
        });
        Arc::clone(store)
    }
}

#[async_trait]
impl QueueEngine for InMemoryEngine {
    async fn create(
        &self,
        name: &ServiceName,
        settings: &QueueSettings,
    ) -> Result<Arc<dyn QueueHandle>, EngineError> {
        let store = self.store(name, settings);
        tracing::debug!(queue = %name, prefix = %settings.prefix, worker = settings.is_worker, "queue handle created");
        Ok(Arc::new(InMemoryQueue {
            name: name.clone(),
            settings: settings.clone(),
            store,
            workers: Mutex::new(None),
            processing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle onto one in-memory queue.
pub struct InMemoryQueue {
    name: ServiceName,
    settings: QueueSettings,
    store: Arc<QueueStore>,
    workers: Mutex<Option<WorkerGroup>>,
    processing: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryQueue {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueHandle for InMemoryQueue {
    fn name(&self) -> &ServiceName {
        &self.name
    }

    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn ready(&self) -> Result<(), EngineError> {
        self.ensure_open()
    }

    async fn save(&self, job: NewJob) -> Result<JobHandle, EngineError> {
        self.ensure_open()?;
        self.store.save(job).await
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, EngineError> {
        Ok(self.store.get(id).await)
    }

    async fn process(
        &self,
        concurrency: usize,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        if !self.settings.is_worker {
            return Err(EngineError::NotWorker(self.name.clone()));
        }
        if self.processing.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyProcessing(self.name.clone()));
        }

        let concurrency = concurrency.max(1);
        let group = WorkerGroup::spawn(
            concurrency,
            Arc::clone(&self.store),
            self.settings.clone(),
            processor,
        );
        *self.workers.lock().await = Some(group);
        tracing::info!(queue = %self.name, concurrency, "processing started");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.store.subscribe()
    }

    async fn check_health(&self) -> Result<HealthCounters, EngineError> {
        Ok(self.store.health().await)
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let group = self.workers.lock().await.take();
        if let Some(group) = group {
            group.shutdown_and_join().await;
            tracing::info!(queue = %self.name, "processing stopped");
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), EngineError> {
        self.store.clear().await;
        self.store.wake_all();
        tracing::info!(queue = %self.name, "queue destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureKind, JobFailure, JobOutcome};
    use crate::ports::JobContext;
    use serde_json::{Map, Value, json};
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl JobProcessor for Echo {
        async fn process(&self, ctx: JobContext) -> Result<Value, JobFailure> {
            ctx.report_progress(50).await;
            Ok(Value::Object(ctx.data().clone()))
        }
    }

    struct Sleepy(Duration);

    #[async_trait]
    impl JobProcessor for Sleepy {
        async fn process(&self, _ctx: JobContext) -> Result<Value, JobFailure> {
            tokio::time::sleep(self.0).await;
            Ok(Value::Null)
        }
    }

    struct Panics;

    #[async_trait]
    impl JobProcessor for Panics {
        async fn process(&self, _ctx: JobContext) -> Result<Value, JobFailure> {
            panic!("worker crashed");
        }
    }

    fn name(raw: &str) -> ServiceName {
        ServiceName::new(raw).unwrap()
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn handles_with_same_prefix_share_a_queue() {
        let engine = InMemoryEngine::new();
        let producer = engine
            .create(&name("calc"), &QueueSettings::default().producer())
            .await
            .unwrap();
        let worker = engine
            .create(&name("calc"), &QueueSettings::default())
            .await
            .unwrap();

        let handle = producer.save(NewJob::new(payload(json!({"t": 1})))).await.unwrap();
        worker.process(2, Arc::new(Echo)).await.unwrap();

        match handle.wait().await {
            JobOutcome::Succeeded { result, .. } => assert_eq!(result, json!({"t": 1})),
            other => panic!("unexpected outcome: {other:?}"),
        }
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn different_prefixes_are_isolated() {
        let engine = InMemoryEngine::new();
        let a = engine
            .create(&name("calc"), &QueueSettings::default().with_prefix("a"))
            .await
            .unwrap();
        let b = engine
            .create(&name("calc"), &QueueSettings::default().with_prefix("b"))
            .await
            .unwrap();
        a.save(NewJob::new(Map::new())).await.unwrap();

        assert_eq!(a.check_health().await.unwrap().get("waiting"), 1);
        assert_eq!(b.check_health().await.unwrap().get("waiting"), 0);
    }

    #[tokio::test]
    async fn producer_cannot_process() {
        let engine = InMemoryEngine::new();
        let producer = engine
            .create(&name("calc"), &QueueSettings::default().producer())
            .await
            .unwrap();
        let err = producer.process(1, Arc::new(Echo)).await.unwrap_err();
        assert!(matches!(err, EngineError::NotWorker(_)));
    }

    #[tokio::test]
    async fn process_twice_is_rejected() {
        let engine = InMemoryEngine::new();
        let worker = engine
            .create(&name("calc"), &QueueSettings::default())
            .await
            .unwrap();
        worker.process(1, Arc::new(Echo)).await.unwrap();
        let err = worker.process(1, Arc::new(Echo)).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyProcessing(_)));
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn save_after_close_fails() {
        let engine = InMemoryEngine::new();
        let queue = engine
            .create(&name("calc"), &QueueSettings::default())
            .await
            .unwrap();
        queue.close().await.unwrap();
        queue.close().await.unwrap();

        let err = queue.save(NewJob::new(Map::new())).await.unwrap_err();
        assert!(matches!(err, EngineError::Closed(_)));
        assert!(queue.ready().await.is_err());
    }

    #[tokio::test]
    async fn timeout_fails_the_job() {
        let engine = InMemoryEngine::new();
        let worker = engine
            .create(&name("slow"), &QueueSettings::default())
            .await
            .unwrap();
        worker
            .process(1, Arc::new(Sleepy(Duration::from_secs(5))))
            .await
            .unwrap();

        let handle = worker
            .save(NewJob::new(Map::new()).timeout(Duration::from_millis(20)))
            .await
            .unwrap();
        match handle.wait().await {
            JobOutcome::Failed { failure, .. } => {
                assert_eq!(failure.kind, FailureKind::Timeout);
                assert_eq!(failure.message(), "Operation timed out");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_as_stalled() {
        let engine = InMemoryEngine::new();
        let worker = engine
            .create(&name("crashy"), &QueueSettings::default())
            .await
            .unwrap();
        let mut events = worker.subscribe();
        worker.process(1, Arc::new(Panics)).await.unwrap();

        let handle = worker.save(NewJob::new(Map::new())).await.unwrap();
        match handle.wait().await {
            JobOutcome::Failed { failure, .. } => assert_eq!(failure.kind, FailureKind::Stalled),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mut stalled = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, QueueEvent::Stalled { .. }) {
                stalled += 1;
            }
        }
        assert_eq!(stalled, 2);
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_waits_for_in_flight_job() {
        let engine = InMemoryEngine::new();
        let worker = engine
            .create(&name("slow"), &QueueSettings::default())
            .await
            .unwrap();
        worker
            .process(1, Arc::new(Sleepy(Duration::from_millis(50))))
            .await
            .unwrap();
        let handle = worker.save(NewJob::new(Map::new())).await.unwrap();

        // let the worker pick it up
        tokio::time::sleep(Duration::from_millis(10)).await;
        worker.close().await.unwrap();
        assert!(handle.wait().await.is_success());
    }

    #[tokio::test]
    async fn destroy_empties_the_queue() {
        let engine = InMemoryEngine::new();
        let queue = engine
            .create(&name("calc"), &QueueSettings::default().producer())
            .await
            .unwrap();
        let handle = queue.save(NewJob::new(Map::new())).await.unwrap();
        queue.destroy().await.unwrap();

        assert_eq!(queue.check_health().await.unwrap().total(), 0);
        assert!(queue.get_job(handle.id()).await.unwrap().is_none());
        assert!(!handle.wait().await.is_success());
    }
}
