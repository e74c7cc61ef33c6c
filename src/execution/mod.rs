//! Execution queue, per-instance leases and the sweeper that drains the queue

/// Per-instance single-flight leases
pub mod lease;
/// Execution queue contract and in-memory implementation
pub mod queue;
/// Bounded-concurrency sweep loop
pub mod sweeper;

pub use lease::{InstanceLease, InstanceLeases};
pub use queue::{ExecutionQueue, InMemoryExecutionQueue, DEFAULT_PRIORITY};
pub use sweeper::{SweepReport, Sweeper, SweeperConfig};

use tracing::debug;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::tenant::TenantContext;

/// Queue workflow instances for a reconciliation pass
pub async fn queue_for_reconciliation<I>(ctx: &TenantContext, workflow_ids: I) -> EngineResult<()>
where
    I: IntoIterator<Item = Uuid>,
{
    for workflow_id in workflow_ids {
        ctx.queue.enqueue(workflow_id, DEFAULT_PRIORITY).await?;
        debug!(tenant = %ctx.tenant, workflow_id = %workflow_id, "Queued for reconciliation");
    }
    Ok(())
}
