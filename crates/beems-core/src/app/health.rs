//! Health aggregation across queue handles.

use std::sync::Arc;

use crate::domain::{EngineError, HealthCounters};
use crate::ports::QueueHandle;

/// Sum the counters of every handle, key by key.
///
/// The result always has every job state as a key, even with no handles.
pub async fn aggregate(handles: &[Arc<dyn QueueHandle>]) -> Result<HealthCounters, EngineError> {
    let mut total = HealthCounters::zeroed();
    for handle in handles {
        let counters = handle.check_health().await?;
        total.merge(&counters);
    }
    Ok(total)
}
