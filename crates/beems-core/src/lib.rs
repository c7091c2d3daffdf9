//! beems-core
//!
//! Request/response RPC over a persistent job queue.
//!
//! # Modules
//! - **domain**: value types (names, ids, payloads, job options, outcomes, health, errors, events)
//! - **ports**: abstraction layer (QueueEngine, QueueHandle, JobProcessor, Clock, IdGenerator)
//! - **app**: Client, Server, handler registry and routing
//! - **impls**: InMemoryEngine for development and tests
//! - **config** / **logging**: `Options` and the stock tracing subscriber

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod logging;
pub mod ports;

pub use app::{Client, Handler, Reply, Server, Service, TypedMethod, handler_fn};
pub use config::{LogFormat, LoggingConfig, Options, QueueSettings};
pub use domain::{HandlerError, JobOptions};
pub use error::{BeemsError, Result};
pub use impls::InMemoryEngine;
pub use logging::init_logging;
pub use ports::JobContext;
