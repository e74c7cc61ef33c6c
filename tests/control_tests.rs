mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use uuid::Uuid;

use common::Fixture;
use workflow_executor::error::EngineError;
use workflow_executor::execution::ExecutionQueue;
use workflow_executor::store::WorkflowStore;
use workflow_executor::workflow::state::{CompletionCriteria, GroupType, QueueStatus};
use workflow_executor::workflow::{ReconcileOutcome, TaskStatus, TaskType, WorkflowStatus};

#[tokio::test]
async fn test_start_pause_resume_terminate() {
    let fx = Fixture::new();
    let control = fx.engine.control();
    let workflow = fx.workflow().await;
    assert!(!fx.is_queued(workflow.id).await);

    let started = control.start_workflow(&fx.ctx, workflow.id).await.unwrap();
    assert_eq!(started.status, WorkflowStatus::Running);
    assert!(started.start_time.is_some());
    assert!(fx.is_queued(workflow.id).await);

    let err = control.start_workflow(&fx.ctx, workflow.id).await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));

    control.pause_workflow(&fx.ctx, workflow.id).await.unwrap();
    assert_eq!(fx.workflow_status(workflow.id).await, WorkflowStatus::Paused);
    assert!(!fx.is_queued(workflow.id).await);

    // paused workflows are inert
    assert_eq!(
        fx.engine.reconcile_now(&fx.ctx, workflow.id).await,
        ReconcileOutcome::Inert
    );
    assert!(!fx.is_queued(workflow.id).await);

    let err = control.pause_workflow(&fx.ctx, workflow.id).await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));

    control.resume_workflow(&fx.ctx, workflow.id).await.unwrap();
    assert_eq!(fx.workflow_status(workflow.id).await, WorkflowStatus::Running);
    assert!(fx.is_queued(workflow.id).await);

    let terminated = control
        .terminate_workflow(&fx.ctx, workflow.id, Some("cancelled by owner"))
        .await
        .unwrap();
    assert_eq!(terminated.status, WorkflowStatus::Terminated);
    assert!(terminated.end_time.is_some());
    assert_eq!(terminated.status_reason.as_deref(), Some("cancelled by owner"));
    assert!(!fx.is_queued(workflow.id).await);

    let err = control.resume_workflow(&fx.ctx, workflow.id).await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));
}

#[tokio::test]
async fn test_control_on_unknown_ids() {
    let fx = Fixture::new();
    let control = fx.engine.control();

    let err = control.pause_workflow(&fx.ctx, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "Workflow instance", .. }));

    let err = control
        .complete_task(&fx.ctx, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_typed_completion_requires_matching_type() {
    let fx = Fixture::new();
    let control = fx.engine.control();
    let workflow = fx.running_workflow().await;
    let approve = fx.task_def(TaskType::Approve, 0).await;
    let task = fx.task_in(workflow.id, None, &approve).await;
    fx.drain(workflow.id).await;

    let err = control.submit_task(&fx.ctx, task.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(fx.task_status(task.id).await, TaskStatus::InProgress);

    let approved = control
        .approve_task(&fx.ctx, task.id, Some(json!({"approver": "dana"})))
        .await
        .unwrap();
    assert_eq!(approved.status, TaskStatus::Approved);
    assert_eq!(approved.output, Some(json!({"approver": "dana"})));
    assert!(fx.is_queued(workflow.id).await);

    let err = control.complete_task(&fx.ctx, task.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));
}

#[tokio::test]
async fn test_skip_records_reason() {
    let fx = Fixture::new();
    let workflow = fx.running_workflow().await;
    let todo = fx.task_def(TaskType::Todo, 0).await;
    let task = fx.task_in(workflow.id, None, &todo).await;

    let skipped = fx
        .engine
        .control()
        .skip_task(&fx.ctx, task.id, "covered elsewhere")
        .await
        .unwrap();
    assert_eq!(skipped.status, TaskStatus::Skipped);
    assert_eq!(
        skipped.output,
        Some(json!({"skipped": true, "reason": "covered elsewhere"}))
    );
    assert!(skipped.end_time.is_some());

    fx.drain(workflow.id).await;
    assert_eq!(fx.workflow_status(workflow.id).await, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_resubmit_failed_task() {
    let fx = Fixture::new();
    let control = fx.engine.control();
    let workflow = fx.running_workflow().await;
    let group_def = fx
        .group_def(GroupType::Horizontal, CompletionCriteria::Any, 1, 0)
        .await;
    let group = fx.root_group(workflow.id, &group_def).await;
    let todo = fx.task_def(TaskType::Todo, 0).await;
    let flaky = fx.task_in(workflow.id, Some(group.id), &todo).await;
    let other = fx.task_in(workflow.id, Some(group.id), &todo).await;
    fx.drain(workflow.id).await;

    control.fail_task(&fx.ctx, flaky.id, "bad input").await.unwrap();
    fx.drain(workflow.id).await;
    assert_eq!(fx.group(group.id).await.status, TaskStatus::InProgress);

    let resubmitted = control.resubmit_task(&fx.ctx, flaky.id).await.unwrap();
    assert_eq!(resubmitted.status, TaskStatus::NotStarted);
    assert!(resubmitted.failure_reason.is_none());
    assert!(resubmitted.start_time.is_none());
    assert!(resubmitted.end_time.is_none());
    assert!(fx.is_queued(workflow.id).await);

    fx.drain(workflow.id).await;
    assert_eq!(fx.task_status(flaky.id).await, TaskStatus::InProgress);

    control.complete_task(&fx.ctx, other.id, None).await.unwrap();
    let err = control.resubmit_task(&fx.ctx, other.id).await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));
}

#[tokio::test]
async fn test_reassign_and_due_date_only_while_open() {
    let fx = Fixture::new();
    let control = fx.engine.control();
    let workflow = fx.running_workflow().await;
    let todo = fx.task_def(TaskType::Todo, 0).await;
    let task = fx.task_in(workflow.id, None, &todo).await;

    let task = control.reassign_task(&fx.ctx, task.id, "sam").await.unwrap();
    assert_eq!(task.assignee.as_deref(), Some("sam"));

    let due = Utc::now() + ChronoDuration::days(2);
    let task = control
        .update_due_date(&fx.ctx, task.id, Some(due))
        .await
        .unwrap();
    assert_eq!(task.due_date, Some(due));

    let err = control.reassign_task(&fx.ctx, task.id, "  ").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    control.complete_task(&fx.ctx, task.id, None).await.unwrap();
    let err = control.reassign_task(&fx.ctx, task.id, "kim").await.unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));
    let err = control
        .update_due_date(&fx.ctx, task.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IllegalState(_)));
}

#[tokio::test]
async fn test_expire_overdue_tasks() {
    let fx = Fixture::new();
    let workflow = fx.running_workflow().await;
    let todo = fx.task_def(TaskType::Todo, 0).await;
    let overdue = fx
        .task_in(workflow.id, None, &todo)
        .await
        .with_due_date(Utc::now() - ChronoDuration::hours(1));
    fx.ctx.store.update_task(&overdue).await.unwrap();
    let later = fx
        .task_in(workflow.id, None, &todo)
        .await
        .with_due_date(Utc::now() + ChronoDuration::hours(1));
    fx.ctx.store.update_task(&later).await.unwrap();
    fx.drain(workflow.id).await;

    let expired = fx
        .engine
        .control()
        .expire_overdue_tasks(&fx.ctx, Utc::now())
        .await
        .unwrap();
    assert_eq!(expired, 1);

    let overdue = fx.task(overdue.id).await;
    assert_eq!(overdue.status, TaskStatus::Expired);
    assert_eq!(overdue.failure_reason.as_deref(), Some("due date passed"));
    assert_eq!(fx.task_status(later.id).await, TaskStatus::InProgress);

    fx.drain(workflow.id).await;
    assert_eq!(fx.workflow_status(workflow.id).await, WorkflowStatus::Failed);
}

#[tokio::test]
async fn test_archive_and_queue_cleanup() {
    let fx = Fixture::new();
    let control = fx.engine.control();

    let mut old = fx.workflow().await;
    old.status = WorkflowStatus::Completed;
    old.end_time = Some(Utc::now() - ChronoDuration::hours(2));
    fx.ctx.store.update_workflow(&old).await.unwrap();

    let mut recent = fx.workflow().await;
    recent.status = WorkflowStatus::Failed;
    recent.end_time = Some(Utc::now());
    fx.ctx.store.update_workflow(&recent).await.unwrap();

    let archived = control
        .archive_terminal_workflows(&fx.ctx, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(archived, 1);
    assert_eq!(fx.workflow_status(old.id).await, WorkflowStatus::Archived);
    assert_eq!(fx.workflow_status(recent.id).await, WorkflowStatus::Failed);

    fx.ctx.queue.enqueue(recent.id, 0).await.unwrap();
    fx.ctx
        .queue
        .update_status(recent.id, QueueStatus::Completed)
        .await
        .unwrap();
    assert_eq!(control.cleanup_queue(&fx.ctx, Duration::from_secs(3600)).await.unwrap(), 0);
    assert_eq!(control.cleanup_queue(&fx.ctx, Duration::ZERO).await.unwrap(), 1);
    assert!(!fx.is_queued(recent.id).await);
}
