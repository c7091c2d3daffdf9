//! ServiceRegistry - (service, method) -> handler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::handler::Handler;
use crate::domain::{MethodName, ServiceName};

/// Handlers by service and method.
///
/// Registration is first-wins: a later handler for an existing pair is ignored.
/// Lookups happen at call time, so a method registered after its service
/// started is routable.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<ServiceName, HashMap<MethodName, Arc<dyn Handler>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the pair was already registered.
    pub fn register(
        &self,
        service: ServiceName,
        method: MethodName,
        handler: Arc<dyn Handler>,
    ) -> bool {
        let mut services = self.services.write();
        let methods = services.entry(service.clone()).or_default();
        if methods.contains_key(&method) {
            tracing::debug!(service = %service, method = %method, "handler already registered, ignoring");
            return false;
        }
        tracing::debug!(service = %service, method = %method, "handler registered");
        methods.insert(method, handler);
        true
    }

    pub fn get(&self, service: &ServiceName, method: &MethodName) -> Option<Arc<dyn Handler>> {
        self.services.read().get(service)?.get(method).cloned()
    }

    /// Registered method names of a service, sorted.
    pub fn methods(&self, service: &ServiceName) -> Vec<MethodName> {
        let services = self.services.read();
        let mut methods: Vec<MethodName> = services
            .get(service)
            .map(|methods| methods.keys().cloned().collect())
            .unwrap_or_default();
        methods.sort();
        methods
    }
}
