//! Group handler protocol
//!
//! A vertical group runs its children one at a time in definition order and
//! fails as soon as any child fails. A horizontal group starts every child at
//! once and completes according to its completion criterion.
//!
//! Handlers never descend into subgroups themselves: starting a child group
//! moves it to `IN_PROGRESS` and reports its id in [`GroupProgress`], and the
//! caller decides when to execute it.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::completion::{self, ChildCounts};
use super::model::{TaskGroupDefinition, TaskGroupInstance, TaskInstance};
use super::state::{
    is_terminal, is_terminal_failure, is_terminal_success, CompletionCriteria, GroupType,
    TaskStatus,
};
use super::task::TaskRunner;
use crate::error::{EngineError, EngineResult};
use crate::execution::queue_for_reconciliation;
use crate::tenant::TenantContext;

/// A direct child of a group
#[derive(Debug, Clone)]
pub enum Child {
    /// Leaf task
    Task {
        /// Task instance
        task: TaskInstance,
        /// Order index from the task definition
        order: i32,
    },
    /// Nested group
    Group {
        /// Group instance
        group: TaskGroupInstance,
        /// Order index from the group definition
        order: i32,
    },
}

impl Child {
    /// Instance id of the child
    pub fn id(&self) -> Uuid {
        match self {
            Child::Task { task, .. } => task.id,
            Child::Group { group, .. } => group.id,
        }
    }

    /// Current status of the child
    pub fn status(&self) -> TaskStatus {
        match self {
            Child::Task { task, .. } => task.status,
            Child::Group { group, .. } => group.status,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Child::Task { .. } => "Task",
            Child::Group { .. } => "Group",
        }
    }

    fn sort_key(&self) -> (i32, DateTime<Utc>) {
        match self {
            Child::Task { task, order } => (*order, task.created_at),
            Child::Group { group, order } => (*order, group.created_at),
        }
    }
}

/// Where a group stands after an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Children are still running
    Waiting,
    /// The group moved to `COMPLETED`
    Completed,
    /// The group moved to `FAILED`
    Failed,
}

/// Result of driving a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupProgress {
    /// Group state after the invocation
    pub outcome: GroupOutcome,
    /// Child groups moved to `IN_PROGRESS` that still need executing
    pub started_groups: Vec<Uuid>,
}

impl GroupProgress {
    fn new(outcome: GroupOutcome) -> Self {
        Self {
            outcome,
            started_groups: Vec::new(),
        }
    }
}

/// Strategy object driving one group instance
pub struct GroupHandler<'a> {
    ctx: &'a TenantContext,
    runner: &'a TaskRunner,
    group: TaskGroupInstance,
    definition: TaskGroupDefinition,
}

impl std::fmt::Debug for GroupHandler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupHandler")
            .field("tenant", &self.ctx.tenant)
            .field("group", &self.group)
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl<'a> GroupHandler<'a> {
    /// Resolve the handler for a group instance through its definition
    pub async fn load(
        ctx: &'a TenantContext,
        runner: &'a TaskRunner,
        group: TaskGroupInstance,
    ) -> EngineResult<GroupHandler<'a>> {
        let definition = ctx
            .definitions
            .group_definition(group.group_definition_id)
            .await?;
        Ok(Self {
            ctx,
            runner,
            group,
            definition,
        })
    }

    /// Resolve the handler for a group instance id
    pub async fn load_by_id(
        ctx: &'a TenantContext,
        runner: &'a TaskRunner,
        group_id: Uuid,
    ) -> EngineResult<GroupHandler<'a>> {
        let group = ctx
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| EngineError::group_not_found(group_id))?;
        Self::load(ctx, runner, group).await
    }

    /// Group instance as last seen by this handler
    pub fn group(&self) -> &TaskGroupInstance {
        &self.group
    }

    /// Sequential or parallel
    pub fn group_type(&self) -> GroupType {
        self.definition.group_type
    }

    fn criteria(&self) -> CompletionCriteria {
        self.definition.completion_criteria
    }

    /// Direct children, ordered by definition order then creation time
    pub async fn children(&self) -> EngineResult<Vec<Child>> {
        let mut children = Vec::new();

        for task in self.ctx.store.tasks_in_group(self.group.id).await? {
            let order = match self.ctx.definitions.task_definition(task.task_definition_id).await {
                Ok(definition) => definition.order,
                Err(e) => {
                    warn!(task_id = %task.id, "Task order unavailable, defaulting to 0: {}", e);
                    0
                }
            };
            children.push(Child::Task { task, order });
        }

        for group in self.ctx.store.child_groups(self.group.id).await? {
            let order = match self.ctx.definitions.group_definition(group.group_definition_id).await {
                Ok(definition) => definition.order,
                Err(e) => {
                    warn!(group_id = %group.id, "Group order unavailable, defaulting to 0: {}", e);
                    0
                }
            };
            children.push(Child::Group { group, order });
        }

        children.sort_by_key(Child::sort_key);
        Ok(children)
    }

    /// Whether the group's completion rule holds for `children`
    pub fn evaluate_completion(&self, children: &[Child]) -> bool {
        match self.group_type() {
            GroupType::Vertical => children.iter().all(|c| is_terminal_success(c.status())),
            GroupType::Horizontal => completion::evaluate_completion(
                self.criteria(),
                self.group.min_completion,
                ChildCounts::tally(children.iter().map(Child::status)),
            ),
        }
    }

    /// Whether the group could still complete given the failures in `children`
    pub fn can_still_complete(&self, children: &[Child]) -> bool {
        match self.group_type() {
            GroupType::Vertical => !children.iter().any(|c| is_terminal_failure(c.status())),
            GroupType::Horizontal => completion::can_still_complete(
                self.criteria(),
                self.group.min_completion,
                ChildCounts::tally(children.iter().map(Child::status)),
            ),
        }
    }

    /// Fail the group if it can no longer complete.
    ///
    /// Checked after a child failure, and once every child has concluded
    /// without meeting the criterion (an N_OF_M target above the child
    /// count). Returns whether the group failed.
    pub async fn fail_if_unreachable(&mut self) -> EngineResult<bool> {
        if self.group.is_terminal() {
            return Ok(false);
        }
        let children = self.children().await?;
        let any_failed = children.iter().any(|c| is_terminal_failure(c.status()));
        let all_concluded =
            !children.is_empty() && children.iter().all(|c| is_terminal(c.status()));
        if !any_failed && !all_concluded {
            return Ok(false);
        }

        if all_concluded {
            if self.evaluate_completion(&children) {
                return Ok(false);
            }
            if !any_failed {
                warn!(
                    group_id = %self.group.id,
                    min_completion = self.group.min_completion,
                    children = children.len(),
                    "Every child succeeded but the completion target exceeds the child count"
                );
            }
        } else if self.can_still_complete(&children) {
            debug!(group_id = %self.group.id, "Group tolerates child failure");
            return Ok(false);
        }

        let reason = match self.group_type() {
            GroupType::Vertical => "A step of the sequential group failed".to_string(),
            GroupType::Horizontal => format!(
                "Completion criterion {:?} can no longer be met",
                self.criteria()
            ),
        };
        self.move_to_failed(&reason).await?;
        Ok(true)
    }

    /// Start the group and drive it
    pub async fn run(&mut self) -> EngineResult<GroupProgress> {
        if let Err(e) = self.move_to_in_progress().await {
            warn!(group_id = %self.group.id, "Error running task group: {}", e);
            self.move_to_failed(&format!("Error running task group: {}", e))
                .await?;
            return Ok(GroupProgress::new(GroupOutcome::Failed));
        }
        self.execute().await
    }

    /// Drive the group: start eligible children and apply the completion rule.
    ///
    /// Internal errors fail the group rather than propagate; only a failure to
    /// record that outcome is returned as an error.
    pub async fn execute(&mut self) -> EngineResult<GroupProgress> {
        if self.group.is_terminal() {
            let outcome = if is_terminal_success(self.group.status) {
                GroupOutcome::Completed
            } else {
                GroupOutcome::Failed
            };
            return Ok(GroupProgress::new(outcome));
        }

        let group_type = self.group_type();
        let result = match group_type {
            GroupType::Vertical => self.execute_vertical().await,
            GroupType::Horizontal => self.execute_horizontal().await,
        };

        match result {
            Ok(progress) => Ok(progress),
            Err(e) => {
                warn!(group_id = %self.group.id, "Error executing {:?} group: {}", group_type, e);
                self.move_to_failed(&format!("Error executing {:?} group: {}", group_type, e))
                    .await?;
                Ok(GroupProgress::new(GroupOutcome::Failed))
            }
        }
    }

    async fn execute_vertical(&mut self) -> EngineResult<GroupProgress> {
        let children = self.children().await?;
        debug!(group_id = %self.group.id, children = children.len(), "Executing vertical group");

        if let Some(failed) = children.iter().find(|c| is_terminal_failure(c.status())) {
            let reason = format!("{} {} failed or expired", failed.kind(), failed.id());
            self.move_to_failed(&reason).await?;
            return Ok(GroupProgress::new(GroupOutcome::Failed));
        }

        for child in children {
            match child.status() {
                status if is_terminal_success(status) => continue,
                TaskStatus::NotStarted => {
                    let mut progress = GroupProgress::new(GroupOutcome::Waiting);
                    self.start_child(child, &mut progress).await?;
                    return Ok(progress);
                }
                _ => return Ok(GroupProgress::new(GroupOutcome::Waiting)),
            }
        }

        self.move_to_complete().await?;
        Ok(GroupProgress::new(GroupOutcome::Completed))
    }

    async fn execute_horizontal(&mut self) -> EngineResult<GroupProgress> {
        let children = self.children().await?;
        debug!(group_id = %self.group.id, children = children.len(), "Executing horizontal group");

        if self.evaluate_completion(&children) {
            self.move_to_complete().await?;
            return Ok(GroupProgress::new(GroupOutcome::Completed));
        }

        let mut progress = GroupProgress::new(GroupOutcome::Waiting);
        let mut started = 0usize;
        for child in children {
            if child.status() == TaskStatus::NotStarted {
                self.start_child(child, &mut progress).await?;
                started += 1;
            }
        }

        if started > 0 {
            let children = self.children().await?;
            if self.evaluate_completion(&children) {
                self.move_to_complete().await?;
                progress.outcome = GroupOutcome::Completed;
            }
        }
        Ok(progress)
    }

    async fn start_child(&mut self, child: Child, progress: &mut GroupProgress) -> EngineResult<()> {
        match child {
            Child::Task { task, .. } => {
                info!(group_id = %self.group.id, task_id = %task.id, "Starting task");
                self.runner.run(self.ctx, task).await?;
            }
            Child::Group { group, .. } => {
                info!(group_id = %self.group.id, child_group_id = %group.id, "Starting child group");
                let child_id = group.id;
                let mut handler = GroupHandler::load(self.ctx, self.runner, group).await?;
                handler.move_to_in_progress().await?;
                progress.started_groups.push(child_id);
            }
        }
        Ok(())
    }

    /// Move the group to `IN_PROGRESS`
    pub async fn move_to_in_progress(&mut self) -> EngineResult<()> {
        if self.group.status != TaskStatus::NotStarted {
            return Err(EngineError::IllegalState(format!(
                "Group {} cannot start from status {}",
                self.group.id, self.group.status
            )));
        }
        self.group.status = TaskStatus::InProgress;
        self.group.start_time = Some(Utc::now());
        self.ctx.store.update_group(&self.group).await?;
        info!(group_id = %self.group.id, "Task group moved to IN_PROGRESS");
        Ok(())
    }

    /// Move the group to `COMPLETED` and queue its workflow
    pub async fn move_to_complete(&mut self) -> EngineResult<()> {
        if self.group.is_terminal() {
            return Ok(());
        }
        self.group.status = TaskStatus::Completed;
        self.group.end_time = Some(Utc::now());
        self.ctx.store.update_group(&self.group).await?;
        info!(group_id = %self.group.id, "Task group completed");
        queue_for_reconciliation(self.ctx, [self.group.workflow_instance_id]).await
    }

    /// Move the group to `FAILED` and queue its workflow
    pub async fn move_to_failed(&mut self, reason: &str) -> EngineResult<()> {
        if self.group.is_terminal() {
            return Ok(());
        }
        self.group.status = TaskStatus::Failed;
        self.group.failure_reason = Some(reason.to_string());
        self.group.end_time = Some(Utc::now());
        self.ctx.store.update_group(&self.group).await?;
        warn!(group_id = %self.group.id, "Task group failed: {}", reason);
        queue_for_reconciliation(self.ctx, [self.group.workflow_instance_id]).await
    }
}
