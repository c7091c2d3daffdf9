use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::store::QueueStore;
use crate::config::QueueSettings;
use crate::domain::JobFailure;
use crate::ports::{JobContext, JobProcessor, ProgressSink};

/// Worker group handle.
/// - dropping `shutdown_tx` stops every worker
/// - `shutdown_and_join()` waits for in-flight jobs to finish
pub(super) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(
        n: usize,
        store: Arc<QueueStore>,
        settings: QueueSettings,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = Arc::new(settings);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let store = Arc::clone(&store);
            let settings = Arc::clone(&settings);
            let processor = Arc::clone(&processor);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, store, settings, processor, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Stop taking new jobs. In-flight handlers are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<QueueStore>,
    settings: Arc<QueueSettings>,
    processor: Arc<dyn JobProcessor>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease may block; race it against shutdown
        let job = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            job = store.lease() => job,
        };

        let id = job.id.clone();
        let timeout = job.options.timeout;
        tracing::debug!(worker_id, queue = %store.name(), job_id = %id, attempt = job.attempts, "job started");

        let progress: Arc<dyn ProgressSink> = store.clone();
        let ctx = JobContext::new(job, progress);
        let processor = Arc::clone(&processor);

        // Run on its own task so a panicking handler shows up as a stall
        // instead of taking the worker down.
        let mut task = tokio::spawn(async move { processor.process(ctx).await });
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    Ok(Err(JobFailure::timeout()))
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(result)) => {
                tracing::debug!(worker_id, job_id = %id, "job succeeded");
                store.succeed(&id, result, settings.remove_on_success).await;
            }
            Ok(Err(failure)) => {
                tracing::debug!(worker_id, job_id = %id, kind = ?failure.kind, error = %failure, "job failed");
                store.fail(&id, failure, settings.remove_on_failure).await;
            }
            Err(join_err) => {
                tracing::warn!(worker_id, job_id = %id, error = %join_err, "job task stopped unexpectedly");
                store.stall(&id, settings.remove_on_failure).await;
            }
        }
    }
}
