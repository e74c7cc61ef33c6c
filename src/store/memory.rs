use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DefinitionProvider, WorkflowStore};
use crate::error::{EngineError, EngineResult};
use crate::workflow::model::{
    TaskDefinition, TaskGroupDefinition, TaskGroupInstance, TaskInstance, WorkflowInstance,
};
use crate::workflow::state::{is_terminal, WorkflowStatus};

fn concluded_after(
    status_terminal: bool,
    end_time: Option<DateTime<Utc>>,
    since: Option<DateTime<Utc>>,
) -> bool {
    if !status_terminal {
        return false;
    }
    match (since, end_time) {
        (None, _) => true,
        (Some(since), Some(end)) => end > since,
        // A terminal row without an end time is always reported
        (Some(_), None) => true,
    }
}

fn sorted_by_creation<T, F>(mut rows: Vec<T>, created: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    rows.sort_by_key(|row| created(row));
    rows
}

/// Entity store backed by in-process hash maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<Uuid, WorkflowInstance>>,
    groups: RwLock<HashMap<Uuid, TaskGroupInstance>>,
    tasks: RwLock<HashMap<Uuid, TaskInstance>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored workflow instances
    pub async fn workflow_count(&self) -> usize {
        self.workflows.read().await.len()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn create_workflow(&self, workflow: &WorkflowInstance) -> EngineResult<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> EngineResult<Option<WorkflowInstance>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn update_workflow(&self, workflow: &WorkflowInstance) -> EngineResult<()> {
        let mut workflows = self.workflows.write().await;
        match workflows.get_mut(&workflow.id) {
            Some(stored) => {
                *stored = workflow.clone();
                Ok(())
            }
            None => Err(EngineError::workflow_not_found(workflow.id)),
        }
    }

    async fn workflows_by_status(
        &self,
        status: WorkflowStatus,
    ) -> EngineResult<Vec<WorkflowInstance>> {
        Ok(self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect())
    }

    async fn delete_workflow(&self, id: Uuid) -> EngineResult<()> {
        if self.workflows.write().await.remove(&id).is_none() {
            return Err(EngineError::workflow_not_found(id));
        }
        self.groups
            .write()
            .await
            .retain(|_, g| g.workflow_instance_id != id);
        self.tasks
            .write()
            .await
            .retain(|_, t| t.workflow_instance_id != id);
        Ok(())
    }

    async fn create_group(&self, group: &TaskGroupInstance) -> EngineResult<()> {
        if let Some(parent_id) = group.parent_group_instance_id {
            let groups = self.groups.read().await;
            let parent = groups
                .get(&parent_id)
                .ok_or_else(|| EngineError::group_not_found(parent_id))?;
            if parent.workflow_instance_id != group.workflow_instance_id {
                return Err(EngineError::Validation(format!(
                    "Parent group {} belongs to a different workflow instance",
                    parent_id
                )));
            }
        }
        self.groups.write().await.insert(group.id, group.clone());
        Ok(())
    }

    async fn get_group(&self, id: Uuid) -> EngineResult<Option<TaskGroupInstance>> {
        Ok(self.groups.read().await.get(&id).cloned())
    }

    async fn update_group(&self, group: &TaskGroupInstance) -> EngineResult<()> {
        let mut groups = self.groups.write().await;
        match groups.get_mut(&group.id) {
            Some(stored) => {
                *stored = group.clone();
                Ok(())
            }
            None => Err(EngineError::group_not_found(group.id)),
        }
    }

    async fn root_groups(&self, workflow_id: Uuid) -> EngineResult<Vec<TaskGroupInstance>> {
        let rows: Vec<TaskGroupInstance> = self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.workflow_instance_id == workflow_id && g.is_root())
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |g: &TaskGroupInstance| g.created_at))
    }

    async fn child_groups(&self, parent_id: Uuid) -> EngineResult<Vec<TaskGroupInstance>> {
        let rows: Vec<TaskGroupInstance> = self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.parent_group_instance_id == Some(parent_id))
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |g: &TaskGroupInstance| g.created_at))
    }

    async fn groups_for_workflow(&self, workflow_id: Uuid) -> EngineResult<Vec<TaskGroupInstance>> {
        let rows: Vec<TaskGroupInstance> = self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.workflow_instance_id == workflow_id)
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |g: &TaskGroupInstance| g.created_at))
    }

    async fn create_task(&self, task: &TaskInstance) -> EngineResult<()> {
        if let Some(group_id) = task.group_instance_id {
            let groups = self.groups.read().await;
            let group = groups
                .get(&group_id)
                .ok_or_else(|| EngineError::group_not_found(group_id))?;
            if group.workflow_instance_id != task.workflow_instance_id {
                return Err(EngineError::Validation(format!(
                    "Group {} belongs to a different workflow instance",
                    group_id
                )));
            }
        }
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> EngineResult<Option<TaskInstance>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update_task(&self, task: &TaskInstance) -> EngineResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(EngineError::task_not_found(task.id)),
        }
    }

    async fn top_level_tasks(&self, workflow_id: Uuid) -> EngineResult<Vec<TaskInstance>> {
        let rows: Vec<TaskInstance> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.workflow_instance_id == workflow_id && t.group_instance_id.is_none())
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |t: &TaskInstance| t.created_at))
    }

    async fn tasks_in_group(&self, group_id: Uuid) -> EngineResult<Vec<TaskInstance>> {
        let rows: Vec<TaskInstance> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.group_instance_id == Some(group_id))
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |t: &TaskInstance| t.created_at))
    }

    async fn completed_tasks_since(
        &self,
        workflow_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<TaskInstance>> {
        let rows: Vec<TaskInstance> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.workflow_instance_id == workflow_id)
            .filter(|t| concluded_after(is_terminal(t.status), t.end_time, since))
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |t: &TaskInstance| t.created_at))
    }

    async fn completed_groups_since(
        &self,
        workflow_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<TaskGroupInstance>> {
        let rows: Vec<TaskGroupInstance> = self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.workflow_instance_id == workflow_id)
            .filter(|g| concluded_after(is_terminal(g.status), g.end_time, since))
            .cloned()
            .collect();
        Ok(sorted_by_creation(rows, |g: &TaskGroupInstance| g.created_at))
    }

    async fn overdue_tasks(&self, now: DateTime<Utc>) -> EngineResult<Vec<TaskInstance>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_past_due(now))
            .cloned()
            .collect())
    }
}

/// Definition provider backed by in-process hash maps
#[derive(Debug, Default)]
pub struct InMemoryDefinitions {
    tasks: RwLock<HashMap<Uuid, TaskDefinition>>,
    groups: RwLock<HashMap<Uuid, TaskGroupDefinition>>,
}

impl InMemoryDefinitions {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task definition
    pub async fn add_task_definition(&self, definition: TaskDefinition) {
        self.tasks.write().await.insert(definition.id, definition);
    }

    /// Register a group definition
    pub async fn add_group_definition(&self, definition: TaskGroupDefinition) {
        self.groups.write().await.insert(definition.id, definition);
    }
}

#[async_trait]
impl DefinitionProvider for InMemoryDefinitions {
    async fn task_definition(&self, id: Uuid) -> EngineResult<TaskDefinition> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::definition_not_found("Task definition", id))
    }

    async fn group_definition(&self, id: Uuid) -> EngineResult<TaskGroupDefinition> {
        self.groups
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::definition_not_found("Task group definition", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::TaskStatus;

    #[tokio::test]
    async fn test_delete_workflow_cascades() {
        let store = MemoryStore::new();
        let workflow = WorkflowInstance::new(Uuid::new_v4(), None);
        store.create_workflow(&workflow).await.unwrap();

        let group = TaskGroupInstance::new(workflow.id, Uuid::new_v4());
        store.create_group(&group).await.unwrap();
        let task = TaskInstance::new(workflow.id, Uuid::new_v4()).in_group(group.id);
        store.create_task(&task).await.unwrap();

        store.delete_workflow(workflow.id).await.unwrap();
        assert!(store.get_group(group.id).await.unwrap().is_none());
        assert!(store.get_task(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_parent_must_share_workflow() {
        let store = MemoryStore::new();
        let parent = TaskGroupInstance::new(Uuid::new_v4(), Uuid::new_v4());
        store.create_group(&parent).await.unwrap();

        let stray = TaskGroupInstance::new(Uuid::new_v4(), Uuid::new_v4()).with_parent(parent.id);
        let err = store.create_group(&stray).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_completed_since_baseline() {
        let store = MemoryStore::new();
        let workflow_id = Uuid::new_v4();
        let mut task = TaskInstance::new(workflow_id, Uuid::new_v4());
        task.status = TaskStatus::Completed;
        task.end_time = Some(Utc::now());
        store.create_task(&task).await.unwrap();

        assert_eq!(store.completed_tasks_since(workflow_id, None).await.unwrap().len(), 1);
        let later = Utc::now() + chrono::Duration::seconds(1);
        assert!(store
            .completed_tasks_since(workflow_id, Some(later))
            .await
            .unwrap()
            .is_empty());
    }
}
