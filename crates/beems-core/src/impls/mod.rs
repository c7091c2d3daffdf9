//! Impls - port implementations.
//!
//! # Included
//! - **InMemoryEngine**: single-process queue engine for development and tests
//!
//! Production engines (Redis) live in their own crates and plug in through
//! [`QueueEngine`](crate::ports::QueueEngine).

pub mod memory;

pub use self::memory::{InMemoryEngine, InMemoryQueue};
