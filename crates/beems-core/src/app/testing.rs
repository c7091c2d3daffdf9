//! Shared test fixtures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::app::handler::handler_fn;
use crate::app::service::Service;
use crate::domain::{ExecutionOptions, HandlerError, Job, JobId, JobStatus, ServiceName};
use crate::ports::{JobContext, ProgressSink};

struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _job_id: &JobId, _progress: u8) {}
}

/// A context for an active job with the given payload.
pub(crate) fn context(data: Value) -> JobContext {
    let job = Job {
        id: JobId::parse("1").unwrap(),
        queue: ServiceName::new("calc").unwrap(),
        data: data.as_object().cloned().unwrap(),
        options: ExecutionOptions::default(),
        status: JobStatus::Active,
        progress: 0,
        attempts: 1,
    };
    JobContext::new(job, Arc::new(NoProgress))
}

/// The `calc` service used across the end-to-end tests.
///
/// - `echo`: returns its payload
/// - `boom`: always fails with `"boom"`
/// - `conditional`: fails while the job still has retries left
/// - `delay`: sleeps `ms` milliseconds, then returns `"done"`
pub(crate) fn calc_service() -> Service {
    Service::new("calc")
        .unwrap()
        .method(
            "echo",
            handler_fn(|ctx: JobContext| async move { Ok(Value::Object(ctx.data().clone())) }),
        )
        .unwrap()
        .method(
            "boom",
            handler_fn(|_ctx: JobContext| async move { Err(HandlerError::new("boom")) }),
        )
        .unwrap()
        .method(
            "conditional",
            handler_fn(|ctx: JobContext| async move {
                if ctx.job().options.retries > 0 {
                    return Err(HandlerError::new("not yet"));
                }
                Ok(json!({ "attempts": ctx.job().attempts }))
            }),
        )
        .unwrap()
        .method(
            "delay",
            handler_fn(|ctx: JobContext| async move {
                let ms = ctx.data().get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!("done"))
            }),
        )
        .unwrap()
}
