//! Workflow execution core.
//!
//! The modules are layered leaves first:
//!
//! - `state` and `model` hold the status enumerations and entities
//! - `completion` decides whether a group's criterion holds
//! - `task` and `group` implement the handler protocols
//! - `engine` reconciles one workflow instance per pass
//! - `control` exposes the operations callers use to drive tasks and workflows

/// Completion criteria evaluation
pub mod completion;
/// Task and workflow control operations
pub mod control;
/// Decision engine and the engine facade
pub mod engine;
/// Group handler protocol
pub mod group;
/// Workflow, group, task and queue entities
pub mod model;
/// Status enumerations and transition rules
pub mod state;
/// Task handler protocol, registry and runner
pub mod task;

// Re-export key components
pub use completion::{can_still_complete, evaluate_completion, is_complete, ChildCounts};
pub use control::WorkflowControl;
pub use engine::{DecisionEngine, ReconcileOutcome, WorkflowEngine, WorkflowEngineConfig};
pub use group::{Child, GroupHandler, GroupOutcome, GroupProgress};
pub use model::{
    ExecutionQueueEntry, TaskDefinition, TaskGroupDefinition, TaskGroupInstance, TaskInstance,
    WorkflowInstance,
};
pub use state::{
    CompletionCriteria, GroupType, QueueStatus, TaskStatus, TaskType, WorkflowStatus,
};
pub use task::{
    HttpTaskHandler, HumanTaskHandler, TaskConclusion, TaskExecution, TaskHandler,
    TaskHandlerRegistry, TaskRunner,
};
