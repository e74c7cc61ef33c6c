#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use workflow_executor::error::{EngineError, EngineResult};
use workflow_executor::execution::{ExecutionQueue, InMemoryExecutionQueue};
use workflow_executor::http::{HttpRequest, HttpResponse, HttpTransport};
use workflow_executor::store::{InMemoryDefinitions, MemoryStore, WorkflowStore};
use workflow_executor::tenant::{StaticTenantDirectory, TenantContext, TenantId};
use workflow_executor::workflow::state::{CompletionCriteria, GroupType};
use workflow_executor::workflow::{
    ReconcileOutcome, TaskDefinition, TaskGroupDefinition, TaskGroupInstance, TaskHandlerRegistry,
    TaskInstance, TaskStatus, TaskType, WorkflowEngine, WorkflowEngineConfig, WorkflowInstance,
    WorkflowStatus,
};

pub const TENANT: &str = "acme";

/// Transport answering every request with a fixed status after an optional delay
pub struct StubTransport {
    status: u16,
    delay: Duration,
    error: Option<String>,
    calls: AtomicUsize,
}

impl StubTransport {
    pub fn ok(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            delay: Duration::ZERO,
            error: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(status: u16, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            status,
            delay,
            error: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            status: 0,
            delay: Duration::ZERO,
            error: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, _request: HttpRequest) -> EngineResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.error {
            Some(message) => Err(EngineError::Transport(message.clone())),
            None => Ok(HttpResponse {
                status: self.status,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: "{\"ok\":true}".to_string(),
            }),
        }
    }
}

/// One tenant backed by in-memory collaborators, plus an engine over it
pub struct Fixture {
    pub tenant: TenantId,
    pub ctx: TenantContext,
    pub definitions: Arc<InMemoryDefinitions>,
    pub directory: Arc<StaticTenantDirectory>,
    pub engine: WorkflowEngine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_transport(StubTransport::ok(200), WorkflowEngineConfig::default())
    }

    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        config: WorkflowEngineConfig,
    ) -> Self {
        let tenant = TenantId::new(TENANT);
        let definitions = Arc::new(InMemoryDefinitions::new());
        let ctx = TenantContext::new(
            tenant.clone(),
            Arc::new(MemoryStore::new()),
            definitions.clone(),
            Arc::new(InMemoryExecutionQueue::new()),
        );
        let directory = Arc::new(StaticTenantDirectory::new().with_tenant(ctx.clone()));
        let registry = TaskHandlerRegistry::with_defaults(transport, Duration::from_secs(30));
        let engine = WorkflowEngine::new(config, registry, directory.clone());

        Self {
            tenant,
            ctx,
            definitions,
            directory,
            engine,
        }
    }

    pub async fn workflow(&self) -> WorkflowInstance {
        let workflow = WorkflowInstance::new(Uuid::new_v4(), None);
        self.ctx.store.create_workflow(&workflow).await.unwrap();
        workflow
    }

    /// Create a workflow and start it through the control surface
    pub async fn running_workflow(&self) -> WorkflowInstance {
        let workflow = self.workflow().await;
        self.engine
            .control()
            .start_workflow(&self.ctx, workflow.id)
            .await
            .unwrap()
    }

    pub async fn task_def(&self, task_type: TaskType, order: i32) -> TaskDefinition {
        let definition = TaskDefinition::new(format!("{}-{}", task_type, order), task_type, order);
        self.definitions.add_task_definition(definition.clone()).await;
        definition
    }

    pub async fn group_def(
        &self,
        group_type: GroupType,
        criteria: CompletionCriteria,
        min_completion: u32,
        order: i32,
    ) -> TaskGroupDefinition {
        let definition = TaskGroupDefinition::new("group", group_type, criteria)
            .with_min_completion(min_completion)
            .with_order(order);
        self.definitions.add_group_definition(definition.clone()).await;
        definition
    }

    pub async fn root_group(
        &self,
        workflow_id: Uuid,
        definition: &TaskGroupDefinition,
    ) -> TaskGroupInstance {
        let group = TaskGroupInstance::new(workflow_id, definition.id)
            .with_min_completion(definition.min_completion);
        self.ctx.store.create_group(&group).await.unwrap();
        group
    }

    pub async fn child_group(
        &self,
        workflow_id: Uuid,
        parent_id: Uuid,
        definition: &TaskGroupDefinition,
    ) -> TaskGroupInstance {
        let group = TaskGroupInstance::new(workflow_id, definition.id)
            .with_parent(parent_id)
            .with_min_completion(definition.min_completion);
        self.ctx.store.create_group(&group).await.unwrap();
        group
    }

    pub async fn task_in(
        &self,
        workflow_id: Uuid,
        group_id: Option<Uuid>,
        definition: &TaskDefinition,
    ) -> TaskInstance {
        let mut task = TaskInstance::new(workflow_id, definition.id);
        if let Some(group_id) = group_id {
            task = task.in_group(group_id);
        }
        self.ctx.store.create_task(&task).await.unwrap();
        task
    }

    pub async fn task(&self, id: Uuid) -> TaskInstance {
        self.ctx.store.get_task(id).await.unwrap().unwrap()
    }

    pub async fn task_status(&self, id: Uuid) -> TaskStatus {
        self.task(id).await.status
    }

    pub async fn group(&self, id: Uuid) -> TaskGroupInstance {
        self.ctx.store.get_group(id).await.unwrap().unwrap()
    }

    pub async fn load_workflow(&self, id: Uuid) -> WorkflowInstance {
        self.ctx.store.get_workflow(id).await.unwrap().unwrap()
    }

    pub async fn workflow_status(&self, id: Uuid) -> WorkflowStatus {
        self.load_workflow(id).await.status
    }

    pub async fn is_queued(&self, workflow_id: Uuid) -> bool {
        self.ctx.queue.get(workflow_id).await.unwrap().is_some()
    }

    /// Run passes until the workflow has no queue entry left
    pub async fn drain(&self, workflow_id: Uuid) -> ReconcileOutcome {
        let mut outcome = self.engine.reconcile_now(&self.ctx, workflow_id).await;
        for _ in 0..10 {
            if !self.is_queued(workflow_id).await {
                break;
            }
            outcome = self.engine.reconcile_now(&self.ctx, workflow_id).await;
        }
        outcome
    }
}
