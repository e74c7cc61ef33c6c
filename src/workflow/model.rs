use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::state::{
    is_terminal, CompletionCriteria, GroupType, QueueStatus, TaskStatus, TaskType, WorkflowStatus,
};

/// One running execution of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique ID of the instance
    pub id: Uuid,

    /// Definition this instance executes
    pub definition_id: Uuid,

    /// Current status
    pub status: WorkflowStatus,

    /// Input payload
    pub input: Option<Value>,

    /// Output payload
    pub output: Option<Value>,

    /// Reason recorded on failure or termination
    pub status_reason: Option<String>,

    /// Start time
    pub start_time: Option<DateTime<Utc>>,

    /// End time, set iff the status is terminal
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Create a new workflow instance in `NOT_STARTED`
    pub fn new(definition_id: Uuid, input: Option<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_id,
            status: WorkflowStatus::NotStarted,
            input,
            output: None,
            status_reason: None,
            start_time: None,
            end_time: None,
        }
    }

    /// Set the status, keeping the end timestamp consistent with it
    pub fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        if status == WorkflowStatus::Running && self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        if status.is_terminal() {
            if self.end_time.is_none() {
                self.end_time = Some(Utc::now());
            }
        } else {
            self.end_time = None;
        }
    }
}

/// One node of a workflow's execution tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroupInstance {
    /// Unique ID of the group instance
    pub id: Uuid,

    /// Owning workflow instance
    pub workflow_instance_id: Uuid,

    /// Definition providing the group type and completion criterion
    pub group_definition_id: Uuid,

    /// Parent group; `None` marks a root group
    pub parent_group_instance_id: Option<Uuid>,

    /// Current status
    pub status: TaskStatus,

    /// Minimum successful children, meaningful under `N_OF_M`
    pub min_completion: u32,

    /// Reason recorded when the group failed
    pub failure_reason: Option<String>,

    /// Time the instance was created; breaks ordering ties
    pub created_at: DateTime<Utc>,

    /// Start time
    pub start_time: Option<DateTime<Utc>>,

    /// End time
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskGroupInstance {
    /// Create a root group instance in `NOT_STARTED`
    pub fn new(workflow_instance_id: Uuid, group_definition_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_instance_id,
            group_definition_id,
            parent_group_instance_id: None,
            status: TaskStatus::NotStarted,
            min_completion: 1,
            failure_reason: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
        }
    }

    /// Nest this group under a parent group
    pub fn with_parent(mut self, parent_group_instance_id: Uuid) -> Self {
        self.parent_group_instance_id = Some(parent_group_instance_id);
        self
    }

    /// Set the minimum completion count
    pub fn with_min_completion(mut self, min_completion: u32) -> Self {
        self.min_completion = min_completion;
        self
    }

    /// Whether this is a root group
    pub fn is_root(&self) -> bool {
        self.parent_group_instance_id.is_none()
    }

    /// Whether the group has concluded
    pub fn is_terminal(&self) -> bool {
        is_terminal(self.status)
    }
}

/// One leaf unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    /// Unique ID of the task instance
    pub id: Uuid,

    /// Owning workflow instance
    pub workflow_instance_id: Uuid,

    /// Definition providing the task type
    pub task_definition_id: Uuid,

    /// Owning group; `None` marks a top-level task
    pub group_instance_id: Option<Uuid>,

    /// Actor the task is assigned to
    pub assignee: Option<String>,

    /// Current status
    pub status: TaskStatus,

    /// Input payload
    pub input: Option<Value>,

    /// Output payload
    pub output: Option<Value>,

    /// Time the instance was created; breaks ordering ties
    pub created_at: DateTime<Utc>,

    /// Start time
    pub start_time: Option<DateTime<Utc>>,

    /// End time
    pub end_time: Option<DateTime<Utc>>,

    /// Optional due date
    pub due_date: Option<DateTime<Utc>>,

    /// Reason recorded on failure
    pub failure_reason: Option<String>,
}

impl TaskInstance {
    /// Create a top-level task instance in `NOT_STARTED`
    pub fn new(workflow_instance_id: Uuid, task_definition_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_instance_id,
            task_definition_id,
            group_instance_id: None,
            assignee: None,
            status: TaskStatus::NotStarted,
            input: None,
            output: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            due_date: None,
            failure_reason: None,
        }
    }

    /// Place the task in a group
    pub fn in_group(mut self, group_instance_id: Uuid) -> Self {
        self.group_instance_id = Some(group_instance_id);
        self
    }

    /// Set the input payload
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Set the assignee
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// Set the due date
    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Whether the task has concluded
    pub fn is_terminal(&self) -> bool {
        is_terminal(self.status)
    }

    /// Whether the due date passed while the task is still open
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => !self.is_terminal() && due < now,
            None => false,
        }
    }
}

/// A pending-work marker for one workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionQueueEntry {
    /// Unique ID of the entry
    pub id: Uuid,

    /// Workflow awaiting reconciliation; unique among live entries
    pub workflow_instance_id: Uuid,

    /// Current status
    pub status: QueueStatus,

    /// Higher dispatches first
    pub priority: i32,

    /// Last status change
    pub last_updated: DateTime<Utc>,

    /// Creation time; older entries dispatch first within a priority
    pub created_at: DateTime<Utc>,
}

impl ExecutionQueueEntry {
    /// Create a pending entry
    pub fn new(workflow_instance_id: Uuid, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_instance_id,
            status: QueueStatus::Pending,
            priority,
            last_updated: now,
            created_at: now,
        }
    }
}

/// Static description of a leaf task, provided by the definition collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique ID
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Task type selecting the handler
    pub task_type: TaskType,

    /// Position within a sequential group
    pub order: i32,

    /// Free-form parameters (assignee and due-date hints among them)
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl TaskDefinition {
    /// Create a task definition
    pub fn new(name: impl Into<String>, task_type: TaskType, order: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            task_type,
            order,
            parameters: None,
        }
    }
}

/// Static description of a group, provided by the definition collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroupDefinition {
    /// Unique ID
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Sequential or parallel
    pub group_type: GroupType,

    /// Completion rule
    pub completion_criteria: CompletionCriteria,

    /// Default minimum completion count for `N_OF_M`
    pub min_completion: u32,

    /// Position within a sequential parent group
    pub order: i32,

    /// Free-form parameters
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl TaskGroupDefinition {
    /// Create a group definition
    pub fn new(
        name: impl Into<String>,
        group_type: GroupType,
        completion_criteria: CompletionCriteria,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            group_type,
            completion_criteria,
            min_completion: 1,
            order: 0,
            parameters: None,
        }
    }

    /// Set the minimum completion count
    pub fn with_min_completion(mut self, min_completion: u32) -> Self {
        self.min_completion = min_completion;
        self
    }

    /// Set the order index
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_end_time_tracks_terminal_status() {
        let mut workflow = WorkflowInstance::new(Uuid::new_v4(), None);
        workflow.set_status(WorkflowStatus::Running);
        assert!(workflow.start_time.is_some());
        assert!(workflow.end_time.is_none());

        workflow.set_status(WorkflowStatus::Completed);
        assert!(workflow.end_time.is_some());
    }

    #[test]
    fn test_past_due_only_while_open() {
        let now = Utc::now();
        let mut task = TaskInstance::new(Uuid::new_v4(), Uuid::new_v4())
            .with_due_date(now - Duration::minutes(5));
        assert!(task.is_past_due(now));

        task.status = TaskStatus::Completed;
        assert!(!task.is_past_due(now));
    }
}
