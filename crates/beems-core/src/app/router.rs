//! Router - the processing callback a server installs per service queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::handler::Handler;
use super::registry::ServiceRegistry;
use crate::domain::payload::{is_malformed_tag, tag_of};
use crate::domain::{JobFailure, MethodName, Payload, RoutingError, ServiceName};
use crate::ports::{JobContext, JobProcessor};

/// Routes a job to the handler named by its routing tag.
///
/// Accepts both tag formats: `"echo"` and `"calc.echo"`. An exact method
/// match is tried before the service prefix is stripped.
pub struct Router {
    service: ServiceName,
    registry: Arc<ServiceRegistry>,
}

impl Router {
    pub fn new(service: ServiceName, registry: Arc<ServiceRegistry>) -> Self {
        Self { service, registry }
    }

    /// Resolve the handler for a payload.
    pub fn resolve(&self, payload: &Payload) -> Result<(MethodName, Arc<dyn Handler>), RoutingError> {
        let tag = tag_of(payload).ok_or(RoutingError::MissingTag)?;
        if is_malformed_tag(tag) {
            return Err(RoutingError::InvalidTag(tag.to_string()));
        }

        if let Some(found) = self.lookup(tag) {
            return Ok(found);
        }

        let unqualified = tag
            .strip_prefix(self.service.as_str())
            .and_then(|rest| rest.strip_prefix('.'));
        if let Some(method) = unqualified {
            if is_malformed_tag(method) {
                return Err(RoutingError::InvalidTag(tag.to_string()));
            }
            if let Some(found) = self.lookup(method) {
                return Ok(found);
            }
        }

        Err(RoutingError::HandlerNotFound {
            service: self.service.clone(),
            method: unqualified.unwrap_or(tag).to_string(),
        })
    }

    fn lookup(&self, method: &str) -> Option<(MethodName, Arc<dyn Handler>)> {
        let method = MethodName::new(method).ok()?;
        let handler = self.registry.get(&self.service, &method)?;
        Some((method, handler))
    }
}

#[async_trait]
impl JobProcessor for Router {
    async fn process(&self, ctx: JobContext) -> Result<Value, JobFailure> {
        let (method, handler) = self.resolve(ctx.data()).map_err(|err| {
            tracing::warn!(service = %self.service, job_id = %ctx.id(), error = %err, "routing failed");
            JobFailure::from(err)
        })?;

        let job_id = ctx.id().clone();
        handler.handle(ctx).await.map_err(|err| {
            tracing::debug!(
                service = %self.service,
                method = %method,
                job_id = %job_id,
                error = %err,
                source = ?std::error::Error::source(&err),
                "handler failed"
            );
            JobFailure::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handler::handler_fn;
    use crate::app::testing::context;
    use crate::domain::{FailureKind, HandlerError};
    use rstest::rstest;
    use serde_json::json;

    fn router() -> Router {
        let registry = Arc::new(ServiceRegistry::new());
        let calc = ServiceName::new("calc").unwrap();
        registry.register(
            calc.clone(),
            MethodName::new("echo").unwrap(),
            Arc::new(handler_fn(|ctx: JobContext| async move {
                Ok(Value::Object(ctx.data().clone()))
            })),
        );
        registry.register(
            calc.clone(),
            MethodName::new("boom").unwrap(),
            Arc::new(handler_fn(|_ctx: JobContext| async move {
                Err(HandlerError::new("boom"))
            })),
        );
        Router::new(calc, registry)
    }

    #[rstest]
    #[case::method_tag("echo")]
    #[case::qualified_tag("calc.echo")]
    #[tokio::test]
    async fn routes_both_tag_formats(#[case] tag: &str) {
        let result = router()
            .process(context(json!({"t": 1234, "_": tag})))
            .await
            .unwrap();
        assert_eq!(result, json!({"t": 1234, "_": tag}));
    }

    #[rstest]
    #[case::missing(json!({"t": 1}))]
    #[case::not_a_string(json!({"_": 7}))]
    #[case::empty(json!({"_": ""}))]
    #[case::reserved(json!({"_": "_private"}))]
    #[case::qualified_reserved(json!({"_": "calc._private"}))]
    #[case::unknown(json!({"_": "nope"}))]
    #[case::other_service(json!({"_": "other.echo"}))]
    #[tokio::test]
    async fn bad_tags_are_routing_failures(#[case] payload: Value) {
        let failure = router().process(context(payload)).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Routing);
    }

    #[tokio::test]
    async fn unknown_method_names_the_handler() {
        let failure = router()
            .process(context(json!({"_": "calc.nope"})))
            .await
            .unwrap_err();
        assert_eq!(failure.message(), "no handler for calc.nope");
    }

    #[tokio::test]
    async fn handler_error_is_a_handler_failure() {
        let failure = router()
            .process(context(json!({"_": "boom"})))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Handler);
        assert_eq!(failure.message(), "boom");
    }
}
