//! Service builder.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::handler::{Handler, TypedHandler, TypedMethod};
use crate::domain::{MethodName, ServiceName, ValidationError};

/// A named set of handlers, registered on a [`Server`](crate::Server) in one go.
///
/// ```ignore
/// let calc = Service::new("calc")?
///     .method("echo", handler_fn(|ctx: JobContext| async move {
///         Ok(Value::Object(ctx.data().clone()))
///     }))?;
/// server.add_service(calc, None, None).await?;
/// ```
pub struct Service {
    name: ServiceName,
    methods: Vec<(MethodName, Arc<dyn Handler>)>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self {
            name: ServiceName::new(name)?,
            methods: Vec::new(),
        })
    }

    /// Add a method. A repeated name keeps the first handler.
    pub fn method(
        mut self,
        name: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Result<Self, ValidationError> {
        let name = MethodName::new(name)?;
        if self.methods.iter().any(|(existing, _)| *existing == name) {
            tracing::debug!(service = %self.name, method = %name, "duplicate method, keeping the first");
            return Ok(self);
        }
        self.methods.push((name, Arc::new(handler)));
        Ok(self)
    }

    /// Add a method with a typed payload.
    pub fn typed<T, H>(self, name: impl Into<String>, method: H) -> Result<Self, ValidationError>
    where
        T: DeserializeOwned + Send + 'static,
        H: TypedMethod<T> + 'static,
    {
        self.method(name, TypedHandler::<T, H>::new(method))
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn method_names(&self) -> impl Iterator<Item = &MethodName> {
        self.methods.iter().map(|(name, _)| name)
    }

    pub(crate) fn into_parts(self) -> (ServiceName, Vec<(MethodName, Arc<dyn Handler>)>) {
        (self.name, self.methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handler::handler_fn;
    use crate::ports::JobContext;
    use rstest::rstest;
    use serde_json::Value;

    fn noop() -> impl Handler + 'static {
        handler_fn(|_ctx: JobContext| async move { Ok(Value::Null) })
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_service_names_are_refused(#[case] name: &str) {
        assert!(matches!(
            Service::new(name),
            Err(ValidationError::InvalidServiceName(_))
        ));
    }

    #[test]
    fn reserved_method_names_are_refused() {
        let err = Service::new("calc").unwrap().method("_hidden", noop()).err();
        assert!(matches!(err, Some(ValidationError::ReservedMethodName(_))));
    }

    #[test]
    fn duplicate_methods_keep_one_entry() {
        let service = Service::new("calc")
            .unwrap()
            .method("echo", noop())
            .unwrap()
            .method("echo", noop())
            .unwrap()
            .method("boom", noop())
            .unwrap();
        let names: Vec<&str> = service.method_names().map(MethodName::as_str).collect();
        assert_eq!(names, vec!["echo", "boom"]);
    }
}
