use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Created but not yet started
    NotStarted,
    /// Being driven by the sweeper
    Running,
    /// Suspended; inert to the sweep until resumed
    Paused,
    /// Every root group and top-level task concluded without failure
    Completed,
    /// A failure propagated to the workflow, or a pass could not reconcile it
    Failed,
    /// Stopped by an explicit terminate operation
    Terminated,
    /// Terminal workflow moved aside by housekeeping
    Archived,
}

impl WorkflowStatus {
    /// Whether the workflow has finished and carries an end timestamp
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Terminated
                | WorkflowStatus::Archived
        )
    }

    /// Whether a transition from `self` to `next` is permitted
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, next) {
            (NotStarted, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Completed) | (Running, Failed) | (Running, Terminated) => true,
            (Paused, Terminated) => true,
            (Completed, Archived) | (Failed, Archived) | (Terminated, Archived) => true,
            _ => false,
        }
    }

    /// Status name as stored
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::NotStarted => "NOT_STARTED",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Paused => "PAUSED",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Terminated => "TERMINATED",
            WorkflowStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status shared by task instances and task group instances.
///
/// Groups only ever take `NotStarted`, `InProgress`, `Completed`, `Failed`,
/// `Skipped` and `Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be started
    NotStarted,
    /// Started and waiting for an actor or an outbound call
    InProgress,
    /// Generic success, used by TODO tasks and groups
    Completed,
    /// Success of a SUBMIT task
    Submitted,
    /// Success of an APPROVE task
    Approved,
    /// Success of a REVIEW task
    Reviewed,
    /// Success of an HTTP task
    ApiCallComplete,
    /// Failure
    Failed,
    /// Due date passed before the task concluded
    Expired,
    /// Administratively skipped
    Skipped,
    /// Observable wait state used for reporting
    Blocked,
}

impl TaskStatus {
    /// Status name as stored
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Approved => "APPROVED",
            TaskStatus::Reviewed => "REVIEWED",
            TaskStatus::ApiCallComplete => "API_CALL_COMPLETE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Expired => "EXPIRED",
            TaskStatus::Skipped => "SKIPPED",
            TaskStatus::Blocked => "BLOCKED",
        }
    }

    /// Whether the status has been started but not concluded
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check if a task or group status is a terminal success
pub fn is_terminal_success(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Completed
            | TaskStatus::Submitted
            | TaskStatus::Approved
            | TaskStatus::Reviewed
            | TaskStatus::ApiCallComplete
            | TaskStatus::Skipped
    )
}

/// Check if a task or group status is a terminal failure
pub fn is_terminal_failure(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Failed | TaskStatus::Expired)
}

/// Check if a task or group status is terminal
pub fn is_terminal(status: TaskStatus) -> bool {
    is_terminal_success(status) || is_terminal_failure(status)
}

/// Status of an execution queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Awaiting a reconciliation pass
    Pending,
    /// Claimed by a pass
    Processing,
    /// Finished cleanly (transient; finished entries are normally removed)
    Completed,
    /// Finished with an error (transient)
    Failed,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Kind of leaf task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Generic human to-do
    Todo,
    /// Human submission
    Submit,
    /// Human approval
    Approve,
    /// Human review
    Review,
    /// Outbound HTTP call
    Http,
}

impl TaskType {
    /// All task types, in registration order
    pub const ALL: [TaskType; 5] = [
        TaskType::Todo,
        TaskType::Submit,
        TaskType::Approve,
        TaskType::Review,
        TaskType::Http,
    ];

    /// Terminal-success status a task of this type concludes with
    pub fn completion_status(self) -> TaskStatus {
        match self {
            TaskType::Todo => TaskStatus::Completed,
            TaskType::Submit => TaskStatus::Submitted,
            TaskType::Approve => TaskStatus::Approved,
            TaskType::Review => TaskStatus::Reviewed,
            TaskType::Http => TaskStatus::ApiCallComplete,
        }
    }

    /// Whether the task waits on a human actor
    pub fn is_human(self) -> bool {
        !matches!(self, TaskType::Http)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Todo => "TODO",
            TaskType::Submit => "SUBMIT",
            TaskType::Approve => "APPROVE",
            TaskType::Review => "REVIEW",
            TaskType::Http => "HTTP",
        };
        f.write_str(name)
    }
}

/// How a group drives its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupType {
    /// Sequential: one child at a time, in order
    Vertical,
    /// Parallel: every child at once
    Horizontal,
}

/// Rule for when a group counts as done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionCriteria {
    /// Every child must succeed
    All,
    /// One successful child is enough
    Any,
    /// At least `min_completion` children must succeed
    NOfM,
}
