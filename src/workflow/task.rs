//! Task handler protocol
//!
//! A [`TaskHandler`] exists per [`TaskType`] and is resolved through a
//! constructed [`TaskHandlerRegistry`]. The [`TaskRunner`] owns the task
//! lifecycle around a handler: `run` starts a task and executes it,
//! `complete_and_close` concludes it and queues the owning workflow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use super::model::TaskInstance;
use super::state::{TaskStatus, TaskType};
use crate::error::{EngineError, EngineResult};
use crate::execution::queue_for_reconciliation;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::telemetry::add_metric;
use crate::tenant::TenantContext;

/// Result of a handler's `execute` step
#[derive(Debug, Clone, PartialEq)]
pub enum TaskExecution {
    /// The task stays `IN_PROGRESS` until an external actor concludes it
    Waiting,
    /// The task concluded successfully with an output payload
    Completed(Value),
    /// The task concluded with a failure reason
    Failed(String),
}

/// How a task is being concluded
#[derive(Debug, Clone, PartialEq)]
pub enum TaskConclusion {
    /// Success with the handler's completion status; `None` keeps the current output
    Succeeded(Option<Value>),
    /// Failure with a reason
    Failed(String),
    /// Expiry with a reason
    Expired(String),
    /// Administrative skip with a reason
    Skipped(String),
}

/// Per-task-type strategy
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Task type this handler serves
    fn task_type(&self) -> TaskType;

    /// Whether the handler concludes the task within `execute`
    fn is_stateful(&self) -> bool {
        false
    }

    /// Status a successful task of this type ends in
    fn completion_status(&self) -> TaskStatus {
        self.task_type().completion_status()
    }

    /// Status a failed task of this type ends in
    fn failure_status(&self) -> TaskStatus {
        TaskStatus::Failed
    }

    /// Hook invoked before the task moves to `IN_PROGRESS`
    async fn prepare(&self, _task: &TaskInstance) -> EngineResult<()> {
        Ok(())
    }

    /// Perform the task's own work
    async fn execute(&self, task: &TaskInstance) -> TaskExecution;

    /// Hook invoked after the task concluded
    async fn cleanup(&self, _task: &TaskInstance) {}
}

/// Handler for tasks concluded by a human actor
#[derive(Debug, Clone, Copy)]
pub struct HumanTaskHandler {
    task_type: TaskType,
}

impl HumanTaskHandler {
    /// Create a handler for a human-facing task type
    pub fn new(task_type: TaskType) -> Self {
        Self { task_type }
    }
}

#[async_trait]
impl TaskHandler for HumanTaskHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(&self, task: &TaskInstance) -> TaskExecution {
        debug!(task_id = %task.id, task_type = %self.task_type, "Awaiting actor");
        TaskExecution::Waiting
    }
}

/// Handler that performs an outbound HTTP call and concludes the task.
///
/// Input fields: `url` (required), `method` (default `GET`), `body`,
/// `timeoutSeconds`. Any HTTP response completes the task; its status code,
/// body and headers land in the output.
pub struct HttpTaskHandler {
    transport: Arc<dyn HttpTransport>,
    default_timeout: Duration,
}

impl std::fmt::Debug for HttpTaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTaskHandler")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl HttpTaskHandler {
    /// Create a handler over a transport
    pub fn new(transport: Arc<dyn HttpTransport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    fn text_param(input: &Value, name: &str) -> Option<String> {
        match input.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    fn timeout_param(&self, input: &Value) -> Duration {
        let secs = match input.get("timeoutSeconds") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        secs.map(Duration::from_secs).unwrap_or(self.default_timeout)
    }

    fn build_request(&self, input: Option<&Value>) -> Result<HttpRequest, String> {
        let input = match input {
            Some(input) if input.is_object() => input,
            _ => return Err("Missing input parameters for HTTP task".to_string()),
        };

        let url = match Self::text_param(input, "url") {
            Some(url) if !url.is_empty() => url,
            _ => return Err("URL is required for HTTP task".to_string()),
        };
        let method_name = Self::text_param(input, "method").unwrap_or_else(|| "GET".to_string());
        let method: HttpMethod = method_name
            .parse()
            .map_err(|_| format!("Unsupported HTTP method: {}", method_name))?;

        let mut request = HttpRequest::new(method, &url, self.timeout_param(input))
            .map_err(|e| format!("Error executing HTTP task: {}", e))?
            .with_header("Content-Type", "application/json");
        if matches!(method, HttpMethod::Post | HttpMethod::Put) {
            if let Some(body) = Self::text_param(input, "body") {
                request = request.with_body(body);
            }
        }
        Ok(request)
    }
}

/// Render a response as task output; repeated headers become arrays
pub fn response_output(response: &HttpResponse) -> Value {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in &response.headers {
        match grouped.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value.clone()),
            None => grouped.push((name.clone(), vec![value.clone()])),
        }
    }

    let mut headers = Map::new();
    for (name, mut values) in grouped {
        let value = if values.len() == 1 {
            Value::String(values.remove(0))
        } else {
            Value::Array(values.into_iter().map(Value::String).collect())
        };
        headers.insert(name, value);
    }

    json!({
        "statusCode": response.status,
        "responseBody": response.body,
        "headers": Value::Object(headers),
    })
}

#[async_trait]
impl TaskHandler for HttpTaskHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Http
    }

    fn is_stateful(&self) -> bool {
        true
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn execute(&self, task: &TaskInstance) -> TaskExecution {
        let request = match self.build_request(task.input.as_ref()) {
            Ok(request) => request,
            Err(reason) => return TaskExecution::Failed(reason),
        };
        info!(method = %request.method, url = %request.url, "Executing HTTP task");

        match self.transport.send(request).await {
            Ok(response) => {
                if response.status >= 400 {
                    debug!(status = response.status, "HTTP task received an error status");
                }
                TaskExecution::Completed(response_output(&response))
            }
            Err(err) => {
                warn!("HTTP task transport failure: {}", err);
                TaskExecution::Failed(format!("Error executing HTTP task: {}", err))
            }
        }
    }
}

/// Closed mapping from task type to handler
#[derive(Clone, Default)]
pub struct TaskHandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    /// Registry with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the human-facing handlers only
    pub fn human_only() -> Self {
        let mut registry = Self::new();
        for task_type in TaskType::ALL.into_iter().filter(|t| t.is_human()) {
            registry.register(Arc::new(HumanTaskHandler::new(task_type)));
        }
        registry
    }

    /// Registry with every built-in handler
    pub fn with_defaults(transport: Arc<dyn HttpTransport>, default_timeout: Duration) -> Self {
        let mut registry = Self::human_only();
        registry.register(Arc::new(HttpTaskHandler::new(transport, default_timeout)));
        registry
    }

    /// Register a handler, replacing any previous one for its type
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type(), handler);
    }

    /// Handler for a task type
    pub fn handler(&self, task_type: TaskType) -> EngineResult<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned().ok_or_else(|| {
            EngineError::Validation(format!("No handler registered for task type {}", task_type))
        })
    }

    /// Task types with a registered handler
    pub fn task_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }
}

impl std::fmt::Debug for TaskHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

/// Drives task lifecycles through the registered handlers
#[derive(Debug, Clone)]
pub struct TaskRunner {
    registry: Arc<TaskHandlerRegistry>,
}

impl TaskRunner {
    /// Create a runner over a registry
    pub fn new(registry: Arc<TaskHandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Registry used by this runner
    pub fn registry(&self) -> &TaskHandlerRegistry {
        &self.registry
    }

    /// Task type of a task instance, resolved through its definition
    pub async fn task_type_of(&self, ctx: &TenantContext, task: &TaskInstance) -> EngineResult<TaskType> {
        Ok(ctx
            .definitions
            .task_definition(task.task_definition_id)
            .await?
            .task_type)
    }

    /// Handler responsible for a task instance
    pub async fn handler_for(
        &self,
        ctx: &TenantContext,
        task: &TaskInstance,
    ) -> EngineResult<Arc<dyn TaskHandler>> {
        let task_type = self.task_type_of(ctx, task).await?;
        self.registry.handler(task_type)
    }

    /// Start a `NOT_STARTED` task and execute it
    #[instrument(skip(self, ctx, task), fields(tenant = %ctx.tenant, task_id = %task.id))]
    pub async fn run(&self, ctx: &TenantContext, mut task: TaskInstance) -> EngineResult<TaskInstance> {
        if task.status != TaskStatus::NotStarted {
            return Err(EngineError::IllegalState(format!(
                "Task {} cannot start from status {}",
                task.id, task.status
            )));
        }
        let handler = self.handler_for(ctx, &task).await?;
        handler.prepare(&task).await?;

        task.status = TaskStatus::InProgress;
        task.start_time = Some(Utc::now());
        task.end_time = None;
        ctx.store.update_task(&task).await?;
        info!(task_type = %handler.task_type(), "Task moved to IN_PROGRESS");

        let started = Instant::now();
        let execution = handler.execute(&task).await;
        add_metric(
            "task_execute_duration_ms",
            started.elapsed().as_millis() as f64,
            &[("task_type", handler.task_type().to_string())],
        );

        match execution {
            TaskExecution::Waiting if handler.is_stateful() => {
                let reason = format!(
                    "{} handler returned without concluding the task",
                    handler.task_type()
                );
                self.close(ctx, handler.as_ref(), task, TaskConclusion::Failed(reason))
                    .await
            }
            TaskExecution::Waiting => Ok(task),
            TaskExecution::Completed(output) => {
                self.close(ctx, handler.as_ref(), task, TaskConclusion::Succeeded(Some(output)))
                    .await
            }
            TaskExecution::Failed(reason) => {
                self.close(ctx, handler.as_ref(), task, TaskConclusion::Failed(reason))
                    .await
            }
        }
    }

    /// Conclude a task and queue its workflow for reconciliation
    pub async fn complete_and_close(
        &self,
        ctx: &TenantContext,
        task: TaskInstance,
        conclusion: TaskConclusion,
    ) -> EngineResult<TaskInstance> {
        let handler = self.handler_for(ctx, &task).await?;
        self.close(ctx, handler.as_ref(), task, conclusion).await
    }

    async fn close(
        &self,
        ctx: &TenantContext,
        handler: &dyn TaskHandler,
        mut task: TaskInstance,
        conclusion: TaskConclusion,
    ) -> EngineResult<TaskInstance> {
        if task.is_terminal() {
            return Err(EngineError::IllegalState(format!(
                "Task {} is already {}",
                task.id, task.status
            )));
        }

        match conclusion {
            TaskConclusion::Succeeded(output) => {
                task.status = handler.completion_status();
                if output.is_some() {
                    task.output = output;
                }
                task.failure_reason = None;
            }
            TaskConclusion::Failed(reason) => {
                task.status = handler.failure_status();
                task.failure_reason = Some(reason);
            }
            TaskConclusion::Expired(reason) => {
                task.status = TaskStatus::Expired;
                task.failure_reason = Some(reason);
            }
            TaskConclusion::Skipped(reason) => {
                task.status = TaskStatus::Skipped;
                task.output = Some(json!({ "skipped": true, "reason": reason }));
            }
        }
        task.end_time = Some(Utc::now());
        ctx.store.update_task(&task).await?;

        match &task.failure_reason {
            Some(reason) if task.status == TaskStatus::Failed || task.status == TaskStatus::Expired => {
                warn!(task_id = %task.id, status = %task.status, "Task concluded unsuccessfully: {}", reason)
            }
            _ => info!(task_id = %task.id, status = %task.status, "Task concluded"),
        }

        handler.cleanup(&task).await;
        queue_for_reconciliation(ctx, [task.workflow_instance_id]).await?;
        Ok(task)
    }
}
