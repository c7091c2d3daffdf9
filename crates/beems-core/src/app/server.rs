//! Server - hosts services and processes their jobs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::handler::Handler;
use super::registry::ServiceRegistry;
use super::router::Router;
use super::service::Service;
use super::{health, listener};
use crate::config::{Options, QueueSettings};
use crate::domain::{HealthCounters, MethodName, ServiceName, ValidationError};
use crate::error::Result;
use crate::ports::{QueueEngine, QueueHandle};

struct RunningService {
    handle: Arc<dyn QueueHandle>,
    listener: JoinHandle<()>,
}

impl RunningService {
    async fn stop(self) -> Result<()> {
        let closed = self.handle.close().await;
        self.listener.abort();
        Ok(closed?)
    }
}

/// Worker side: registers handlers and runs one processing loop per service.
///
/// ```ignore
/// let server = Server::new(Arc::new(engine), Options::default());
/// server.add_service(calc, Some(4), None).await?;
/// ...
/// server.close().await?;
/// ```
pub struct Server {
    engine: Arc<dyn QueueEngine>,
    options: Options,
    registry: Arc<ServiceRegistry>,
    services: Mutex<HashMap<ServiceName, RunningService>>,
}

impl Server {
    pub fn new(engine: Arc<dyn QueueEngine>, options: Options) -> Self {
        Self {
            engine,
            options,
            registry: Arc::new(ServiceRegistry::new()),
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Register `handler` as `service.method`. The first registration of a
    /// pair wins; later ones are ignored.
    pub fn register_handler(
        &self,
        service: &str,
        method: &str,
        handler: impl Handler + 'static,
    ) -> Result<()> {
        let service = ServiceName::new(service)?;
        let method = MethodName::new(method)?;
        self.registry.register(service, method, Arc::new(handler));
        Ok(())
    }

    /// Start processing jobs of `service`.
    ///
    /// `concurrency` defaults to the number of CPUs, `settings` to the
    /// configured queue settings. The handle is always a worker handle. Calling
    /// this again with the same settings does nothing; with different settings
    /// it fails.
    pub async fn start_service(
        &self,
        service: &str,
        concurrency: Option<usize>,
        settings: Option<QueueSettings>,
    ) -> Result<()> {
        let name = ServiceName::new(service)?;
        let settings = settings.unwrap_or_else(|| self.options.bee.clone()).worker();

        let mut services = self.services.lock().await;
        if let Some(running) = services.get(&name) {
            if running.handle.settings() == &settings {
                tracing::debug!(service = %name, "service already started");
                return Ok(());
            }
            return Err(ValidationError::IncompatibleHandle(name).into());
        }

        let handle = self.engine.create(&name, &settings).await?;
        handle.ready().await?;
        let listener = listener::spawn(name.clone(), handle.subscribe());
        tracing::info!(service = %name, "service ready");

        let concurrency = concurrency.unwrap_or_else(num_cpus::get).max(1);
        let router = Router::new(name.clone(), Arc::clone(&self.registry));
        if let Err(err) = handle.process(concurrency, Arc::new(router)).await {
            listener.abort();
            return Err(err.into());
        }

        tracing::info!(
            service = %name,
            concurrency,
            methods = ?self.registry.methods(&name),
            "service started"
        );
        services.insert(name, RunningService { handle, listener });
        Ok(())
    }

    /// Register every handler of `service`, then start it.
    pub async fn add_service(
        &self,
        service: Service,
        concurrency: Option<usize>,
        settings: Option<QueueSettings>,
    ) -> Result<()> {
        let (name, methods) = service.into_parts();
        for (method, handler) in methods {
            self.registry.register(name.clone(), method, handler);
        }
        self.start_service(name.as_str(), concurrency, settings).await
    }

    pub async fn add_services(
        &self,
        services: impl IntoIterator<Item = Service>,
        concurrency: Option<usize>,
        settings: Option<QueueSettings>,
    ) -> Result<()> {
        for service in services {
            self.add_service(service, concurrency, settings.clone()).await?;
        }
        Ok(())
    }

    /// Names of the started services, sorted.
    pub async fn services(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self.services.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop taking jobs for `service` and wait for the ones in flight.
    pub async fn stop_service(&self, service: &str) -> Result<()> {
        let name = ServiceName::new(service)?;
        let running = self
            .services
            .lock()
            .await
            .remove(&name)
            .ok_or_else(|| ValidationError::ServiceNotStarted(name.clone()))?;
        running.stop().await?;
        tracing::info!(service = %name, "service stopped");
        Ok(())
    }

    /// Delete everything stored for the queue of `service`, stopping it first
    /// if it is running. A stopped or never-started service is reached
    /// through a producer handle on the configured queue settings.
    pub async fn destroy_service(&self, service: &str) -> Result<()> {
        let name = ServiceName::new(service)?;
        let running = self.services.lock().await.remove(&name);
        match running {
            Some(running) => {
                let handle = Arc::clone(&running.handle);
                running.stop().await?;
                handle.destroy().await?;
            }
            None => {
                let settings = self.options.bee.clone().producer();
                let handle = self.engine.create(&name, &settings).await?;
                let destroyed = handle.destroy().await;
                handle.close().await?;
                destroyed?;
            }
        }
        tracing::info!(service = %name, "service destroyed");
        Ok(())
    }

    /// Job counts of one started service, or summed over all of them.
    pub async fn health(&self, service: Option<&str>) -> Result<HealthCounters> {
        let handles: Vec<Arc<dyn QueueHandle>> = {
            let services = self.services.lock().await;
            match service {
                Some(service) => {
                    let name = ServiceName::new(service)?;
                    let running = services
                        .get(&name)
                        .ok_or(ValidationError::ServiceNotStarted(name))?;
                    vec![Arc::clone(&running.handle)]
                }
                None => services.values().map(|running| Arc::clone(&running.handle)).collect(),
            }
        };
        Ok(health::aggregate(&handles).await?)
    }

    /// Stop every service. Keeps going past failures and returns the first.
    pub async fn close(&self) -> Result<()> {
        let drained: Vec<(ServiceName, RunningService)> =
            self.services.lock().await.drain().collect();
        let mut first_err = None;
        for (name, running) in drained {
            if let Err(err) = running.stop().await {
                tracing::warn!(service = %name, error = %err, "closing service failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Stop every service and delete its queue contents.
    pub async fn destroy(&self) -> Result<()> {
        let drained: Vec<(ServiceName, RunningService)> =
            self.services.lock().await.drain().collect();
        let mut first_err = None;
        for (name, running) in drained {
            let handle = Arc::clone(&running.handle);
            let result = match running.stop().await {
                Ok(()) => handle.destroy().await.map_err(Into::into),
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                tracing::warn!(service = %name, error = %err, "destroying service failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
