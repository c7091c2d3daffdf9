//! App - the dispatch layer.
//!
//! Combines the ports into the client and server surfaces.
//!
//! # Main components
//! - **Client**: encodes calls into jobs, waits for outcomes, reads health
//! - **Server**: registers handlers and runs one processing loop per service
//! - **ServiceRegistry**: (service, method) -> handler
//! - **Router**: the per-service processing callback, resolves routing tags

pub mod client;
pub mod handler;
pub mod health;
mod listener;
pub mod registry;
pub mod router;
pub mod server;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use self::client::{Client, Reply};
pub use self::handler::{FnHandler, Handler, TypedHandler, TypedMethod, handler_fn};
pub use self::registry::ServiceRegistry;
pub use self::router::Router;
pub use self::server::Server;
pub use self::service::Service;
