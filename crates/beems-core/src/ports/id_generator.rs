//! IdGenerator port - job id generation.
//!
//! Engines that do not get ids from their store (the in-memory engine) use this
//! to assign one on save.

use crate::domain::JobId;
use crate::ports::Clock;
use ulid::Ulid;

/// Generates job ids.
///
/// ULID ids sort by creation time and can be generated on any node without
/// coordination.
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// ULID generator whose timestamp part comes from a [`Clock`].
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        JobId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
