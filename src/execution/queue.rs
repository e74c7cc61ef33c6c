use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::workflow::model::ExecutionQueueEntry;
use crate::workflow::state::QueueStatus;

/// Default priority for entries enqueued by the engine itself
pub const DEFAULT_PRIORITY: i32 = 0;

/// Priority-ordered list of workflow instances awaiting reconciliation.
///
/// At most one live entry exists per workflow instance.
#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    /// Add an entry, or reset an existing one to `PENDING` with `priority`
    async fn enqueue(&self, workflow_id: Uuid, priority: i32) -> EngineResult<ExecutionQueueEntry>;

    /// Fetch the entry for a workflow instance
    async fn get(&self, workflow_id: Uuid) -> EngineResult<Option<ExecutionQueueEntry>>;

    /// Change the status of an entry
    async fn update_status(&self, workflow_id: Uuid, status: QueueStatus) -> EngineResult<()>;

    /// Change both the status and the priority of an entry
    async fn update_status_and_priority(
        &self,
        workflow_id: Uuid,
        status: QueueStatus,
        priority: i32,
    ) -> EngineResult<()>;

    /// Remove the entry; returns whether one existed
    async fn remove(&self, workflow_id: Uuid) -> EngineResult<bool>;

    /// Remove the entry only if it is still `PROCESSING`.
    ///
    /// An entry reset to `PENDING` during a pass survives for the next sweep.
    async fn release(&self, workflow_id: Uuid) -> EngineResult<bool>;

    /// Pending entries, optionally including `PROCESSING` ones, ordered by
    /// priority descending then age ascending
    async fn list_pending(&self, include_processing: bool)
        -> EngineResult<Vec<ExecutionQueueEntry>>;

    /// Most recent `last_updated` among `PROCESSING` entries
    async fn latest_processing_timestamp(&self) -> EngineResult<Option<DateTime<Utc>>>;

    /// Purge `COMPLETED`/`FAILED` entries last updated before `older_than`
    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> EngineResult<usize>;

    /// Number of live entries
    async fn len(&self) -> EngineResult<usize>;
}

/// Execution queue backed by an in-process map
#[derive(Debug, Default)]
pub struct InMemoryExecutionQueue {
    entries: Mutex<HashMap<Uuid, ExecutionQueueEntry>>,
}

impl InMemoryExecutionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionQueue for InMemoryExecutionQueue {
    async fn enqueue(&self, workflow_id: Uuid, priority: i32) -> EngineResult<ExecutionQueueEntry> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(workflow_id)
            .and_modify(|entry| {
                entry.status = QueueStatus::Pending;
                entry.priority = priority;
                entry.last_updated = Utc::now();
            })
            .or_insert_with(|| ExecutionQueueEntry::new(workflow_id, priority));
        debug!(workflow_id = %workflow_id, priority, "Workflow enqueued");
        Ok(entry.clone())
    }

    async fn get(&self, workflow_id: Uuid) -> EngineResult<Option<ExecutionQueueEntry>> {
        Ok(self.entries.lock().await.get(&workflow_id).cloned())
    }

    async fn update_status(&self, workflow_id: Uuid, status: QueueStatus) -> EngineResult<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&workflow_id).ok_or(EngineError::NotFound {
            kind: "Execution queue entry",
            id: workflow_id.to_string(),
        })?;
        entry.status = status;
        entry.last_updated = Utc::now();
        Ok(())
    }

    async fn update_status_and_priority(
        &self,
        workflow_id: Uuid,
        status: QueueStatus,
        priority: i32,
    ) -> EngineResult<()> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&workflow_id).ok_or(EngineError::NotFound {
            kind: "Execution queue entry",
            id: workflow_id.to_string(),
        })?;
        entry.status = status;
        entry.priority = priority;
        entry.last_updated = Utc::now();
        Ok(())
    }

    async fn remove(&self, workflow_id: Uuid) -> EngineResult<bool> {
        Ok(self.entries.lock().await.remove(&workflow_id).is_some())
    }

    async fn release(&self, workflow_id: Uuid) -> EngineResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get(&workflow_id) {
            Some(entry) if entry.status == QueueStatus::Processing => {
                entries.remove(&workflow_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_pending(
        &self,
        include_processing: bool,
    ) -> EngineResult<Vec<ExecutionQueueEntry>> {
        let mut pending: Vec<ExecutionQueueEntry> = self
            .entries
            .lock()
            .await
            .values()
            .filter(|entry| match entry.status {
                QueueStatus::Pending => true,
                QueueStatus::Processing => include_processing,
                _ => false,
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(pending)
    }

    async fn latest_processing_timestamp(&self) -> EngineResult<Option<DateTime<Utc>>> {
        Ok(self
            .entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.status == QueueStatus::Processing)
            .map(|entry| entry.last_updated)
            .max())
    }

    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> EngineResult<usize> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            !(matches!(entry.status, QueueStatus::Completed | QueueStatus::Failed)
                && entry.last_updated < older_than)
        });
        Ok(before - entries.len())
    }

    async fn len(&self) -> EngineResult<usize> {
        Ok(self.entries.lock().await.len())
    }
}
