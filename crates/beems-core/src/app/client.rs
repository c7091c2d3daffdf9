//! Client - turns method calls into jobs and waits for their outcome.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::health;
use crate::config::{Options, QueueSettings};
use crate::domain::payload::{routing_tag, stamp, to_payload};
use crate::domain::{
    HealthCounters, Job, JobId, JobOptions, JobOutcome, MethodName, NewJob, ServiceName,
    ValidationError,
};
use crate::error::{BeemsError, Result};
use crate::ports::{JobHandle, QueueEngine, QueueHandle};

/// Result of a successful [`Client::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// The job as it was when it succeeded.
    pub job: Job,
    /// What the handler returned.
    pub response: Value,
}

/// Producer side: one queue handle per accepted service.
///
/// ```ignore
/// let client = Client::new(Arc::new(engine), Options::default());
/// client.accept_service("calc", None).await?;
/// let reply = client.send("calc", "echo", &json!({ "t": 1234 }), None).await?;
/// ```
pub struct Client {
    engine: Arc<dyn QueueEngine>,
    options: Options,
    handles: Mutex<HashMap<ServiceName, Arc<dyn QueueHandle>>>,
}

impl Client {
    pub fn new(engine: Arc<dyn QueueEngine>, options: Options) -> Self {
        Self {
            engine,
            options,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Open a producer handle for `service`. Accepting a service twice does
    /// nothing.
    ///
    /// `settings` defaults to the configured queue settings; the handle never
    /// processes jobs either way.
    pub async fn accept_service(&self, service: &str, settings: Option<QueueSettings>) -> Result<()> {
        let name = ServiceName::new(service)?;
        let mut handles = self.handles.lock().await;
        if handles.contains_key(&name) {
            return Ok(());
        }

        let settings = settings.unwrap_or_else(|| self.options.bee.clone()).producer();
        let handle = self.engine.create(&name, &settings).await?;
        handle.ready().await?;
        tracing::info!(service = %name, "service accepted");
        handles.insert(name, handle);
        Ok(())
    }

    pub async fn accept_services<I, S>(&self, services: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for service in services {
            self.accept_service(service.as_ref(), None).await?;
        }
        Ok(())
    }

    /// Names of the accepted services, sorted.
    pub async fn services(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self.handles.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn handle(&self, name: &ServiceName) -> Result<Arc<dyn QueueHandle>> {
        self.handles
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::ServiceNotAccepted(name.clone()).into())
    }

    /// Save a job calling `service.method` with `payload` and return without
    /// waiting for it.
    ///
    /// Checked in order: service name, service accepted, method name, payload
    /// is an object, job options. `options` defaults to the configured job
    /// options.
    pub async fn forward<P>(
        &self,
        service: &str,
        method: &str,
        payload: &P,
        options: Option<&JobOptions>,
    ) -> Result<JobHandle>
    where
        P: Serialize + ?Sized,
    {
        let service = ServiceName::new(service)?;
        let handle = self.handle(&service).await?;
        let method = MethodName::new(method)?;
        let payload = to_payload(payload)?;
        let options = options.unwrap_or(&self.options.job);
        options.validate()?;

        let tag = routing_tag(self.options.routing, &service, &method);
        let job = options.apply(NewJob::new(stamp(&payload, tag)));
        let job = handle.save(job).await?;
        tracing::debug!(service = %service, method = %method, job_id = %job.id(), "job saved");
        Ok(job)
    }

    /// [`forward`](Self::forward), then wait for the job to succeed or fail.
    ///
    /// Does not time out by itself; pass a `timeout` job option.
    pub async fn send<P>(
        &self,
        service: &str,
        method: &str,
        payload: &P,
        options: Option<&JobOptions>,
    ) -> Result<Reply>
    where
        P: Serialize + ?Sized,
    {
        let handle = self.forward(service, method, payload, options).await?;
        match handle.wait().await {
            JobOutcome::Succeeded { job, result } => Ok(Reply { job, response: result }),
            JobOutcome::Failed { job, failure } => {
                tracing::debug!(service, method, job_id = %job.id, error = %failure, "call failed");
                Err(BeemsError::JobFailed {
                    service: job.queue.clone(),
                    job: Box::new(job),
                    failure,
                })
            }
        }
    }

    /// Job counts of one accepted service, or summed over all of them.
    pub async fn health(&self, service: Option<&str>) -> Result<HealthCounters> {
        let handles = match service {
            Some(service) => vec![self.handle(&ServiceName::new(service)?).await?],
            None => self.handles.lock().await.values().cloned().collect(),
        };
        Ok(health::aggregate(&handles).await?)
    }

    /// Look a job up by id.
    pub async fn job(&self, service: &str, id: &str) -> Result<Option<Job>> {
        let service = ServiceName::new(service)?;
        let handle = self.handle(&service).await?;
        let id = JobId::parse(id)?;
        Ok(handle.get_job(&id).await?)
    }

    /// Close every accepted handle. Keeps going past failures and returns the
    /// first.
    pub async fn close(&self) -> Result<()> {
        let drained: Vec<(ServiceName, Arc<dyn QueueHandle>)> =
            self.handles.lock().await.drain().collect();
        let mut first_err = None;
        for (name, handle) in drained {
            if let Err(err) = handle.close().await {
                tracing::warn!(service = %name, error = %err, "closing handle failed");
                first_err.get_or_insert(BeemsError::from(err));
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
