//! Persistence and definition collaborators
//!
//! The engine never touches rows directly; every read and write of workflow,
//! group and task instances goes through [`WorkflowStore`], and the static
//! shape of a workflow comes from a [`DefinitionProvider`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::workflow::model::{
    TaskDefinition, TaskGroupDefinition, TaskGroupInstance, TaskInstance, WorkflowInstance,
};
use crate::workflow::state::WorkflowStatus;

/// In-memory implementations of the collaborators
pub mod memory;

pub use memory::{InMemoryDefinitions, MemoryStore};

/// Entity storage for one tenant
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a workflow instance
    async fn create_workflow(&self, workflow: &WorkflowInstance) -> EngineResult<()>;

    /// Fetch a workflow instance by id
    async fn get_workflow(&self, id: Uuid) -> EngineResult<Option<WorkflowInstance>>;

    /// Replace a stored workflow instance
    async fn update_workflow(&self, workflow: &WorkflowInstance) -> EngineResult<()>;

    /// List workflow instances in a given status
    async fn workflows_by_status(&self, status: WorkflowStatus)
        -> EngineResult<Vec<WorkflowInstance>>;

    /// Delete a workflow instance together with its groups and tasks
    async fn delete_workflow(&self, id: Uuid) -> EngineResult<()>;

    /// Insert a group instance
    async fn create_group(&self, group: &TaskGroupInstance) -> EngineResult<()>;

    /// Fetch a group instance by id
    async fn get_group(&self, id: Uuid) -> EngineResult<Option<TaskGroupInstance>>;

    /// Replace a stored group instance
    async fn update_group(&self, group: &TaskGroupInstance) -> EngineResult<()>;

    /// Groups without a parent, for one workflow
    async fn root_groups(&self, workflow_id: Uuid) -> EngineResult<Vec<TaskGroupInstance>>;

    /// Direct subgroups of a group
    async fn child_groups(&self, parent_id: Uuid) -> EngineResult<Vec<TaskGroupInstance>>;

    /// Every group of a workflow
    async fn groups_for_workflow(&self, workflow_id: Uuid) -> EngineResult<Vec<TaskGroupInstance>>;

    /// Insert a task instance
    async fn create_task(&self, task: &TaskInstance) -> EngineResult<()>;

    /// Fetch a task instance by id
    async fn get_task(&self, id: Uuid) -> EngineResult<Option<TaskInstance>>;

    /// Replace a stored task instance
    async fn update_task(&self, task: &TaskInstance) -> EngineResult<()>;

    /// Tasks without a group, for one workflow
    async fn top_level_tasks(&self, workflow_id: Uuid) -> EngineResult<Vec<TaskInstance>>;

    /// Direct child tasks of a group
    async fn tasks_in_group(&self, group_id: Uuid) -> EngineResult<Vec<TaskInstance>>;

    /// Tasks of a workflow that reached a terminal status after `since`,
    /// or every terminal task when `since` is `None`
    async fn completed_tasks_since(
        &self,
        workflow_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<TaskInstance>>;

    /// Groups of a workflow that reached a terminal status after `since`,
    /// or every terminal group when `since` is `None`
    async fn completed_groups_since(
        &self,
        workflow_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<TaskGroupInstance>>;

    /// Non-terminal tasks whose due date is before `now`
    async fn overdue_tasks(&self, now: DateTime<Utc>) -> EngineResult<Vec<TaskInstance>>;
}

/// Source of group and task definitions
#[async_trait]
pub trait DefinitionProvider: Send + Sync {
    /// Resolve a task definition; not-found when unknown
    async fn task_definition(&self, id: Uuid) -> EngineResult<TaskDefinition>;

    /// Resolve a group definition; not-found when unknown
    async fn group_definition(&self, id: Uuid) -> EngineResult<TaskGroupDefinition>;
}
