//! Caller-facing operations on tasks and workflows
//!
//! Task completion operations conclude a task through the task runner, which
//! queues the owning workflow. Workflow control operations move the workflow
//! through its lifecycle and keep the execution queue in step.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::model::{TaskInstance, WorkflowInstance};
use super::state::{is_terminal_failure, TaskStatus, TaskType, WorkflowStatus};
use super::task::{TaskConclusion, TaskRunner};
use crate::error::{EngineError, EngineResult};
use crate::execution::queue_for_reconciliation;
use crate::tenant::TenantContext;

/// Reason recorded on tasks expired by the overdue sweep
pub const DUE_DATE_PASSED: &str = "due date passed";

/// Task and workflow control operations
#[derive(Debug, Clone)]
pub struct WorkflowControl {
    runner: TaskRunner,
}

impl WorkflowControl {
    /// Create the control surface over a task runner
    pub fn new(runner: TaskRunner) -> Self {
        Self { runner }
    }

    async fn load_task(&self, ctx: &TenantContext, task_id: Uuid) -> EngineResult<TaskInstance> {
        ctx.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(task_id))
    }

    async fn load_workflow(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
    ) -> EngineResult<WorkflowInstance> {
        ctx.store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))
    }

    async fn open_task(&self, ctx: &TenantContext, task_id: Uuid) -> EngineResult<TaskInstance> {
        let task = self.load_task(ctx, task_id).await?;
        if task.is_terminal() {
            return Err(EngineError::IllegalState(format!(
                "Task {} is already {}",
                task.id, task.status
            )));
        }
        Ok(task)
    }

    async fn conclude_typed(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        expected: TaskType,
        output: Option<Value>,
    ) -> EngineResult<TaskInstance> {
        let task = self.open_task(ctx, task_id).await?;
        let task_type = self.runner.task_type_of(ctx, &task).await?;
        if task_type != expected {
            return Err(EngineError::Validation(format!(
                "Task {} is a {} task, not {}",
                task.id, task_type, expected
            )));
        }
        self.runner
            .complete_and_close(ctx, task, TaskConclusion::Succeeded(output))
            .await
    }

    /// Complete a task with its type's success status
    #[instrument(skip(self, ctx, output), fields(tenant = %ctx.tenant))]
    pub async fn complete_task(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        output: Option<Value>,
    ) -> EngineResult<TaskInstance> {
        let task = self.open_task(ctx, task_id).await?;
        self.runner
            .complete_and_close(ctx, task, TaskConclusion::Succeeded(output))
            .await
    }

    /// Conclude a SUBMIT task as `SUBMITTED`
    pub async fn submit_task(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        output: Option<Value>,
    ) -> EngineResult<TaskInstance> {
        self.conclude_typed(ctx, task_id, TaskType::Submit, output)
            .await
    }

    /// Conclude an APPROVE task as `APPROVED`
    pub async fn approve_task(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        output: Option<Value>,
    ) -> EngineResult<TaskInstance> {
        self.conclude_typed(ctx, task_id, TaskType::Approve, output)
            .await
    }

    /// Conclude a REVIEW task as `REVIEWED`
    pub async fn review_task(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        output: Option<Value>,
    ) -> EngineResult<TaskInstance> {
        self.conclude_typed(ctx, task_id, TaskType::Review, output)
            .await
    }

    /// Fail a task with a reason
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn fail_task(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        reason: &str,
    ) -> EngineResult<TaskInstance> {
        let task = self.open_task(ctx, task_id).await?;
        self.runner
            .complete_and_close(ctx, task, TaskConclusion::Failed(reason.to_string()))
            .await
    }

    /// Expire a task
    pub async fn expire_task(&self, ctx: &TenantContext, task_id: Uuid) -> EngineResult<TaskInstance> {
        let task = self.open_task(ctx, task_id).await?;
        self.runner
            .complete_and_close(ctx, task, TaskConclusion::Expired("Task expired".to_string()))
            .await
    }

    /// Skip a task; skipped tasks count as successful
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn skip_task(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        reason: &str,
    ) -> EngineResult<TaskInstance> {
        let task = self.open_task(ctx, task_id).await?;
        self.runner
            .complete_and_close(ctx, task, TaskConclusion::Skipped(reason.to_string()))
            .await
    }

    /// Reset a `FAILED` or `EXPIRED` task to `NOT_STARTED` and queue its workflow
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn resubmit_task(&self, ctx: &TenantContext, task_id: Uuid) -> EngineResult<TaskInstance> {
        let mut task = self.load_task(ctx, task_id).await?;
        if !is_terminal_failure(task.status) {
            return Err(EngineError::IllegalState(format!(
                "Cannot resubmit task {} with status {}",
                task.id, task.status
            )));
        }

        task.status = TaskStatus::NotStarted;
        task.failure_reason = None;
        task.start_time = None;
        task.end_time = None;
        ctx.store.update_task(&task).await?;
        info!(task_id = %task.id, "Task resubmitted");

        queue_for_reconciliation(ctx, [task.workflow_instance_id]).await?;
        Ok(task)
    }

    fn ensure_reassignable(task: &TaskInstance) -> EngineResult<()> {
        match task.status {
            TaskStatus::NotStarted | TaskStatus::InProgress | TaskStatus::Blocked => Ok(()),
            status => Err(EngineError::IllegalState(format!(
                "Task {} cannot be changed in status {}",
                task.id, status
            ))),
        }
    }

    /// Assign a task to a different actor
    pub async fn reassign_task(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        assignee: &str,
    ) -> EngineResult<TaskInstance> {
        if assignee.trim().is_empty() {
            return Err(EngineError::Validation("Assignee must not be empty".to_string()));
        }
        let mut task = self.load_task(ctx, task_id).await?;
        Self::ensure_reassignable(&task)?;
        task.assignee = Some(assignee.to_string());
        ctx.store.update_task(&task).await?;
        Ok(task)
    }

    /// Change or clear a task's due date
    pub async fn update_due_date(
        &self,
        ctx: &TenantContext,
        task_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> EngineResult<TaskInstance> {
        let mut task = self.load_task(ctx, task_id).await?;
        Self::ensure_reassignable(&task)?;
        task.due_date = due_date;
        ctx.store.update_task(&task).await?;
        Ok(task)
    }

    async fn transition(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
        allowed_from: &[WorkflowStatus],
        to: WorkflowStatus,
        reason: Option<String>,
    ) -> EngineResult<WorkflowInstance> {
        let mut workflow = self.load_workflow(ctx, workflow_id).await?;
        if !allowed_from.contains(&workflow.status) {
            return Err(EngineError::IllegalState(format!(
                "Workflow {} cannot move from {} to {}",
                workflow.id, workflow.status, to
            )));
        }
        workflow.set_status(to);
        if reason.is_some() {
            workflow.status_reason = reason;
        }
        ctx.store.update_workflow(&workflow).await?;
        info!(workflow_id = %workflow.id, status = %to, "Workflow status changed");
        Ok(workflow)
    }

    /// Start a `NOT_STARTED` workflow and queue it
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn start_workflow(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
    ) -> EngineResult<WorkflowInstance> {
        let workflow = self
            .transition(
                ctx,
                workflow_id,
                &[WorkflowStatus::NotStarted],
                WorkflowStatus::Running,
                None,
            )
            .await?;
        queue_for_reconciliation(ctx, [workflow_id]).await?;
        Ok(workflow)
    }

    /// Pause a running workflow; its queue entry is dropped
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn pause_workflow(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
    ) -> EngineResult<WorkflowInstance> {
        let workflow = self
            .transition(
                ctx,
                workflow_id,
                &[WorkflowStatus::Running],
                WorkflowStatus::Paused,
                None,
            )
            .await?;
        ctx.queue.remove(workflow_id).await?;
        Ok(workflow)
    }

    /// Resume a paused workflow and queue it
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn resume_workflow(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
    ) -> EngineResult<WorkflowInstance> {
        let workflow = self
            .transition(
                ctx,
                workflow_id,
                &[WorkflowStatus::Paused],
                WorkflowStatus::Running,
                None,
            )
            .await?;
        queue_for_reconciliation(ctx, [workflow_id]).await?;
        Ok(workflow)
    }

    /// Terminate a running or paused workflow; its queue entry is dropped
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn terminate_workflow(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
        reason: Option<&str>,
    ) -> EngineResult<WorkflowInstance> {
        let workflow = self
            .transition(
                ctx,
                workflow_id,
                &[WorkflowStatus::Running, WorkflowStatus::Paused],
                WorkflowStatus::Terminated,
                Some(reason.unwrap_or("Terminated by request").to_string()),
            )
            .await?;
        ctx.queue.remove(workflow_id).await?;
        Ok(workflow)
    }

    /// Expire every open task whose due date has passed.
    ///
    /// Returns the number of tasks expired.
    pub async fn expire_overdue_tasks(
        &self,
        ctx: &TenantContext,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let mut expired = 0;
        for task in ctx.store.overdue_tasks(now).await? {
            let task_id = task.id;
            match self
                .runner
                .complete_and_close(ctx, task, TaskConclusion::Expired(DUE_DATE_PASSED.to_string()))
                .await
            {
                Ok(_) => expired += 1,
                Err(e) => warn!(task_id = %task_id, "Could not expire overdue task: {}", e),
            }
        }
        if expired > 0 {
            info!(tenant = %ctx.tenant, expired, "Expired overdue tasks");
        }
        Ok(expired)
    }

    /// Archive workflows that ended more than `retention` ago.
    ///
    /// Returns the number of workflows archived.
    pub async fn archive_terminal_workflows(
        &self,
        ctx: &TenantContext,
        retention: Duration,
    ) -> EngineResult<usize> {
        let retention = ChronoDuration::from_std(retention)
            .map_err(|e| EngineError::Validation(format!("Invalid retention: {}", e)))?;
        let cutoff = Utc::now() - retention;

        let mut archived = 0;
        for status in [
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Terminated,
        ] {
            for mut workflow in ctx.store.workflows_by_status(status).await? {
                if workflow.end_time.map_or(false, |end| end < cutoff) {
                    workflow.set_status(WorkflowStatus::Archived);
                    ctx.store.update_workflow(&workflow).await?;
                    archived += 1;
                }
            }
        }
        if archived > 0 {
            info!(tenant = %ctx.tenant, archived, "Archived terminal workflows");
        }
        Ok(archived)
    }

    /// Purge finished queue entries older than `retention`
    pub async fn cleanup_queue(&self, ctx: &TenantContext, retention: Duration) -> EngineResult<usize> {
        let retention = ChronoDuration::from_std(retention)
            .map_err(|e| EngineError::Validation(format!("Invalid retention: {}", e)))?;
        ctx.queue.cleanup_finished(Utc::now() - retention).await
    }
}
