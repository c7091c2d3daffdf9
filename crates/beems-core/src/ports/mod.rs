//! Ports - abstraction layer over external systems.
//!
//! The queue engine (Redis in production) is only reached through these traits,
//! so the client and server can be driven by the in-memory engine in tests.

pub mod clock;
pub mod id_generator;
pub mod queue_engine;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_engine::{
    JobContext, JobHandle, JobProcessor, ProgressSink, QueueEngine, QueueHandle,
};
