//! Benchmarks for completion evaluation and reconciliation passes
//!
//! This benchmark measures:
//! - Completion criteria evaluation over groups of growing size
//! - A full decide pass over a wide parallel group

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use uuid::Uuid;

use workflow_executor::store::{InMemoryDefinitions, MemoryStore, WorkflowStore};
use workflow_executor::execution::InMemoryExecutionQueue;
use workflow_executor::tenant::{TenantContext, TenantId};
use workflow_executor::workflow::state::{CompletionCriteria, GroupType};
use workflow_executor::workflow::{
    is_complete, DecisionEngine, TaskDefinition, TaskGroupDefinition, TaskGroupInstance,
    TaskHandlerRegistry, TaskInstance, TaskRunner, TaskStatus, TaskType, WorkflowInstance,
    WorkflowStatus,
};

fn bench_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("completion");

    for size in [10usize, 100, 1000] {
        let statuses: Vec<TaskStatus> = (0..size)
            .map(|i| match i % 4 {
                0 => TaskStatus::Completed,
                1 => TaskStatus::Failed,
                2 => TaskStatus::InProgress,
                _ => TaskStatus::Skipped,
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("n_of_m", size), &statuses, |b, statuses| {
            b.iter(|| {
                is_complete(
                    CompletionCriteria::NOfM,
                    black_box((size / 2) as u32),
                    statuses.iter().copied(),
                )
            })
        });
    }

    group.finish();
}

async fn wide_workflow(width: usize) -> (TenantContext, Uuid) {
    let definitions = Arc::new(InMemoryDefinitions::new());
    let store = Arc::new(MemoryStore::new());
    let ctx = TenantContext::new(
        TenantId::new("bench"),
        store.clone(),
        definitions.clone(),
        Arc::new(InMemoryExecutionQueue::new()),
    );

    let group_def = TaskGroupDefinition::new("wide", GroupType::Horizontal, CompletionCriteria::All);
    let task_def = TaskDefinition::new("todo", TaskType::Todo, 0);
    definitions.add_group_definition(group_def.clone()).await;
    definitions.add_task_definition(task_def.clone()).await;

    let mut workflow = WorkflowInstance::new(Uuid::new_v4(), None);
    workflow.set_status(WorkflowStatus::Running);
    store.create_workflow(&workflow).await.unwrap();

    let group = TaskGroupInstance::new(workflow.id, group_def.id);
    store.create_group(&group).await.unwrap();
    for _ in 0..width {
        let task = TaskInstance::new(workflow.id, task_def.id).in_group(group.id);
        store.create_task(&task).await.unwrap();
    }
    (ctx, workflow.id)
}

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide");
    let rt = Runtime::new().unwrap();
    let engine = DecisionEngine::new(TaskRunner::new(Arc::new(TaskHandlerRegistry::human_only())));

    for width in [10usize, 100] {
        group.bench_function(BenchmarkId::new("start_wide_group", width), |b| {
            b.to_async(&rt).iter_batched(
                || rt.block_on(wide_workflow(width)),
                |(ctx, workflow_id)| {
                    let engine = engine.clone();
                    async move { black_box(engine.decide(&ctx, workflow_id, None).await) }
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_completion, bench_decide);
criterion_main!(benches);
