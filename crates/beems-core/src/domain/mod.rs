//! Domain model (names, ids, payloads, job options, outcomes, health).
//!
//! Nothing in here talks to a queue; these are the values that flow between
//! the client, the engine and the server.

pub mod backoff;
pub mod errors;
pub mod events;
pub mod health;
pub mod ids;
pub mod job;
mod millis;
pub mod names;
pub mod outcome;
pub mod payload;

pub use backoff::{Backoff, BackoffStrategy};
pub use errors::{EngineError, HandlerError, RoutingError, ValidationError};
pub use events::QueueEvent;
pub use health::HealthCounters;
pub use ids::JobId;
pub use job::{ExecutionOptions, Job, JobOptions, JobStatus, NewJob};
pub use names::{MethodName, RESERVED_PREFIX, ServiceName};
pub use outcome::{FailureKind, JobFailure, JobOutcome};
pub use payload::{Payload, ROUTING_FIELD, RoutingFormat};
