mod common;

use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use common::{Fixture, StubTransport};
use workflow_executor::execution::{ExecutionQueue, SweeperConfig};
use workflow_executor::store::WorkflowStore;
use workflow_executor::tenant::TenantDirectory;
use workflow_executor::workflow::state::QueueStatus;
use workflow_executor::workflow::{TaskStatus, TaskType, WorkflowEngineConfig, WorkflowStatus};

fn config(max_concurrency: usize, permit_timeout: Duration) -> WorkflowEngineConfig {
    WorkflowEngineConfig {
        sweeper: SweeperConfig {
            interval: Duration::from_millis(20),
            max_concurrency,
            permit_timeout,
            ..SweeperConfig::default()
        },
    }
}

async fn http_workflow(fx: &Fixture) -> (uuid::Uuid, uuid::Uuid) {
    let workflow = fx.running_workflow().await;
    let http = fx.task_def(TaskType::Http, 0).await;
    let task = fx
        .task_in(workflow.id, None, &http)
        .await
        .with_input(json!({"url": "http://hooks.test/run"}));
    fx.ctx.store.update_task(&task).await.unwrap();
    (workflow.id, task.id)
}

#[tokio::test]
async fn test_sweep_drives_queued_workflows() {
    let fx = Fixture::new();
    let (first, first_task) = http_workflow(&fx).await;
    let (second, second_task) = http_workflow(&fx).await;

    let report = fx.engine.sweep_once().await;
    assert_eq!(report.tenants, 1);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.skipped_saturated, 0);

    assert_eq!(fx.task_status(first_task).await, TaskStatus::ApiCallComplete);
    assert_eq!(fx.task_status(second_task).await, TaskStatus::ApiCallComplete);
    assert_eq!(fx.workflow_status(first).await, WorkflowStatus::Completed);
    assert_eq!(fx.workflow_status(second).await, WorkflowStatus::Completed);

    // the cascade re-enqueue is drained on the next cycle
    fx.engine.sweep_once().await;
    assert_eq!(fx.ctx.queue.len().await.unwrap(), 0);
    assert_eq!(fx.directory.active_scopes(), 0);
    assert_eq!(fx.engine.sweeper().leases().held_count(), 0);
}

#[tokio::test]
async fn test_saturated_pool_defers_rest_of_batch() {
    let transport = StubTransport::slow(200, Duration::from_millis(200));
    let fx = Fixture::with_transport(transport.clone(), config(1, Duration::from_millis(20)));
    let (first, _) = http_workflow(&fx).await;
    let (second, _) = http_workflow(&fx).await;

    let report = fx.engine.sweep_once().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.skipped_saturated, 1);
    assert_eq!(transport.calls(), 1);
    assert_eq!(fx.engine.sweeper().available_permits(), 1);

    let statuses = [
        fx.workflow_status(first).await,
        fx.workflow_status(second).await,
    ];
    assert!(statuses.contains(&WorkflowStatus::Completed));
    assert!(statuses.contains(&WorkflowStatus::Running));

    for _ in 0..5 {
        if fx.workflow_status(first).await == WorkflowStatus::Completed
            && fx.workflow_status(second).await == WorkflowStatus::Completed
        {
            break;
        }
        fx.engine.sweep_once().await;
    }
    assert_eq!(fx.workflow_status(first).await, WorkflowStatus::Completed);
    assert_eq!(fx.workflow_status(second).await, WorkflowStatus::Completed);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_held_lease_skips_instance() {
    let fx = Fixture::new();
    let (workflow_id, task_id) = http_workflow(&fx).await;

    let lease = fx
        .engine
        .sweeper()
        .leases()
        .try_acquire(&fx.tenant, workflow_id)
        .unwrap();
    let report = fx.engine.sweep_once().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.skipped_leased, 1);
    assert_eq!(fx.task_status(task_id).await, TaskStatus::NotStarted);
    assert!(fx.is_queued(workflow_id).await);

    drop(lease);
    let report = fx.engine.sweep_once().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(fx.workflow_status(workflow_id).await, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_first_sweep_leaves_processing_entries() {
    let fx = Fixture::new();
    let (workflow_id, task_id) = http_workflow(&fx).await;
    fx.ctx
        .queue
        .update_status(workflow_id, QueueStatus::Processing)
        .await
        .unwrap();

    let report = fx.engine.sweep_once().await;
    assert_eq!(report.dispatched, 0);
    assert_eq!(fx.task_status(task_id).await, TaskStatus::NotStarted);

    let report = fx.engine.sweep_once().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(fx.task_status(task_id).await, TaskStatus::ApiCallComplete);
}

#[tokio::test]
async fn test_sweep_runs_housekeeping() {
    let fx = Fixture::new();
    let workflow = fx.running_workflow().await;
    let todo = fx.task_def(TaskType::Todo, 0).await;
    let task = fx.task_in(workflow.id, None, &todo).await;
    fx.drain(workflow.id).await;

    let overdue = fx
        .task(task.id)
        .await
        .with_due_date(Utc::now() - ChronoDuration::minutes(5));
    fx.ctx.store.update_task(&overdue).await.unwrap();

    let report = fx.engine.sweep_once().await;
    assert_eq!(report.expired_tasks, 1);
    assert_eq!(report.dispatched, 1);
    assert_eq!(fx.task_status(task.id).await, TaskStatus::Expired);
    assert_eq!(fx.workflow_status(workflow.id).await, WorkflowStatus::Failed);
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let fx = Fixture::with_transport(StubTransport::ok(204), config(4, Duration::from_millis(50)));
    let (workflow_id, _) = http_workflow(&fx).await;

    let handle = fx.engine.spawn_sweeper();
    fx.engine.force_sweep();

    let mut completed = false;
    for _ in 0..50 {
        if fx.workflow_status(workflow_id).await == WorkflowStatus::Completed {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(completed);

    fx.engine.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
    assert_eq!(fx.directory.active_scopes(), 0);
}

#[tokio::test]
async fn test_slow_pass_does_not_hold_up_other_workflows() {
    let transport = StubTransport::slow(200, Duration::from_millis(1500));
    let fx = Fixture::with_transport(transport.clone(), config(8, Duration::from_millis(50)));
    let (slow, slow_task) = http_workflow(&fx).await;

    let handle = fx.engine.spawn_sweeper();
    for _ in 0..50 {
        if transport.calls() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.calls(), 1);

    let workflow = fx.workflow().await;
    let todo = fx.task_def(TaskType::Todo, 0).await;
    let task = fx.task_in(workflow.id, None, &todo).await;
    fx.engine
        .control()
        .start_workflow(&fx.ctx, workflow.id)
        .await
        .unwrap();
    fx.engine.force_sweep();

    let started = Instant::now();
    let mut picked_up = false;
    while started.elapsed() < Duration::from_millis(500) {
        if fx.task_status(task.id).await == TaskStatus::InProgress {
            picked_up = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(picked_up, "queued workflow waited on an unrelated pass");
    assert_eq!(fx.task_status(slow_task).await, TaskStatus::InProgress);
    assert!(fx.engine.sweeper().leases().is_held(&fx.tenant, slow));

    fx.engine.shutdown();
    tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
    assert_eq!(fx.task_status(slow_task).await, TaskStatus::ApiCallComplete);
    assert_eq!(transport.calls(), 1);
    assert_eq!(fx.engine.sweeper().leases().held_count(), 0);
}
