use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::control::WorkflowControl;
use super::group::GroupHandler;
use super::model::{TaskGroupInstance, WorkflowInstance};
use super::state::{is_terminal, is_terminal_failure, QueueStatus, TaskStatus, WorkflowStatus};
use super::task::{TaskHandlerRegistry, TaskRunner};
use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::execution::queue::DEFAULT_PRIORITY;
use crate::execution::sweeper::{SweepReport, Sweeper, SweeperConfig};
use crate::telemetry::{add_metric, span_duration};
use crate::tenant::{TenantContext, TenantDirectory};

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The workflow is absent or not `RUNNING`; its queue entry was removed
    Inert,
    /// The pass finished; the workflow is now in this status
    Reconciled(WorkflowStatus),
    /// The pass hit an error; the workflow was forced to `FAILED`
    ForcedFailure(String),
    /// Another pass holds the instance lease; nothing was touched
    Busy,
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Inert => "inert",
            ReconcileOutcome::Reconciled(_) => "reconciled",
            ReconcileOutcome::ForcedFailure(_) => "forced_failure",
            ReconcileOutcome::Busy => "busy",
        }
    }
}

/// Per-workflow reconciliation routine
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    runner: TaskRunner,
}

impl DecisionEngine {
    /// Create a decision engine over a task runner
    pub fn new(runner: TaskRunner) -> Self {
        Self { runner }
    }

    /// Task runner used to start tasks
    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Run one reconciliation pass for a workflow instance.
    ///
    /// `since` is the baseline for "recently completed" children; `None`
    /// considers every concluded child. Errors never escape: they force the
    /// workflow to `FAILED` and remove its queue entry.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant, workflow_id = %workflow_id))]
    pub async fn decide(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> ReconcileOutcome {
        let _timer = span_duration("decide");
        let started = Instant::now();

        let outcome = match self.reconcile(ctx, workflow_id, since).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Reconciliation failed: {}", err);
                self.force_failure(ctx, workflow_id, &err).await;
                ReconcileOutcome::ForcedFailure(err.to_string())
            }
        };

        add_metric(
            "reconcile_pass_duration_ms",
            started.elapsed().as_millis() as f64,
            &[
                ("tenant", ctx.tenant.to_string()),
                ("outcome", outcome.label().to_string()),
            ],
        );
        outcome
    }

    async fn reconcile(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> EngineResult<ReconcileOutcome> {
        self.mark_processing(ctx, workflow_id).await?;

        let mut workflow = match ctx.store.get_workflow(workflow_id).await? {
            Some(workflow) if workflow.status == WorkflowStatus::Running => workflow,
            other => {
                debug!(
                    status = ?other.map(|w| w.status),
                    "Workflow not running; dropping queue entry"
                );
                ctx.queue.remove(workflow_id).await?;
                return Ok(ReconcileOutcome::Inert);
            }
        };

        let completed_groups = ctx.store.completed_groups_since(workflow_id, since).await?;
        let completed_tasks = ctx.store.completed_tasks_since(workflow_id, since).await?;
        debug!(
            groups = completed_groups.len(),
            tasks = completed_tasks.len(),
            "Completed children since baseline"
        );

        for group in &completed_groups {
            match group.parent_group_instance_id {
                Some(parent_id) => self.propagate_to_parent(ctx, group, parent_id).await?,
                None if is_terminal_failure(group.status) => {
                    let reason = format!("Root group {} failed", group.id);
                    self.finish(ctx, &mut workflow, WorkflowStatus::Failed, Some(reason))
                        .await?;
                    break;
                }
                None => {}
            }
        }

        if workflow.status == WorkflowStatus::Running {
            if let Some(task) = completed_tasks
                .iter()
                .find(|t| t.group_instance_id.is_none() && is_terminal_failure(t.status))
            {
                let reason = format!("Task {} {}", task.id, task.status);
                self.finish(ctx, &mut workflow, WorkflowStatus::Failed, Some(reason))
                    .await?;
            }
        }

        if workflow.status == WorkflowStatus::Running {
            self.advance_in_progress(ctx, workflow_id).await?;
            self.start_eligible(ctx, workflow_id).await?;
            self.conclude(ctx, &mut workflow).await?;
        }

        ctx.queue.release(workflow_id).await?;
        Ok(ReconcileOutcome::Reconciled(workflow.status))
    }

    async fn mark_processing(&self, ctx: &TenantContext, workflow_id: Uuid) -> EngineResult<()> {
        match ctx.queue.update_status(workflow_id, QueueStatus::Processing).await {
            Err(EngineError::NotFound { .. }) => {
                ctx.queue.enqueue(workflow_id, DEFAULT_PRIORITY).await?;
                ctx.queue
                    .update_status(workflow_id, QueueStatus::Processing)
                    .await
            }
            other => other,
        }
    }

    /// Re-evaluate the parent of a concluded group
    async fn propagate_to_parent(
        &self,
        ctx: &TenantContext,
        child: &TaskGroupInstance,
        parent_id: Uuid,
    ) -> EngineResult<()> {
        let mut parent = GroupHandler::load_by_id(ctx, &self.runner, parent_id).await?;
        if parent.group().is_terminal() {
            return Ok(());
        }

        if is_terminal_failure(child.status) && parent.fail_if_unreachable().await? {
            debug!(group_id = %parent_id, child_group_id = %child.id, "Failure propagated to parent");
            return Ok(());
        }

        let children = parent.children().await?;
        if parent.evaluate_completion(&children) {
            parent.move_to_complete().await?;
        }
        Ok(())
    }

    /// Drive every `IN_PROGRESS` group, children before parents
    async fn advance_in_progress(&self, ctx: &TenantContext, workflow_id: Uuid) -> EngineResult<()> {
        let groups = ctx.store.groups_for_workflow(workflow_id).await?;
        let mut children_of: HashMap<Option<Uuid>, Vec<Uuid>> = HashMap::new();
        for group in &groups {
            children_of
                .entry(group.parent_group_instance_id)
                .or_default()
                .push(group.id);
        }

        let mut post_order = Vec::with_capacity(groups.len());
        let mut stack: Vec<(Uuid, bool)> = children_of
            .get(&None)
            .map(|roots| roots.iter().rev().map(|id| (*id, false)).collect())
            .unwrap_or_default();
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                post_order.push(id);
                continue;
            }
            stack.push((id, true));
            if let Some(children) = children_of.get(&Some(id)) {
                stack.extend(children.iter().rev().map(|child| (*child, false)));
            }
        }

        for group_id in post_order {
            let group = match ctx.store.get_group(group_id).await? {
                Some(group) if group.status.is_active() => group,
                _ => continue,
            };
            let mut handler = GroupHandler::load(ctx, &self.runner, group).await?;
            if handler.fail_if_unreachable().await? {
                continue;
            }
            let progress = handler.execute().await?;
            self.execute_started(ctx, progress.started_groups).await?;
        }
        Ok(())
    }

    /// Execute newly started groups and, transitively, the groups they start
    async fn execute_started(&self, ctx: &TenantContext, started: Vec<Uuid>) -> EngineResult<()> {
        let mut pending = started;
        while let Some(group_id) = pending.pop() {
            let mut handler = GroupHandler::load_by_id(ctx, &self.runner, group_id).await?;
            let progress = handler.execute().await?;
            pending.extend(progress.started_groups);
        }
        Ok(())
    }

    /// Start root groups and top-level tasks that have not started
    async fn start_eligible(&self, ctx: &TenantContext, workflow_id: Uuid) -> EngineResult<()> {
        for group in ctx.store.root_groups(workflow_id).await? {
            if group.status != TaskStatus::NotStarted {
                continue;
            }
            let mut handler = GroupHandler::load(ctx, &self.runner, group).await?;
            let progress = handler.run().await?;
            self.execute_started(ctx, progress.started_groups).await?;
        }

        for task in ctx.store.top_level_tasks(workflow_id).await? {
            if task.status == TaskStatus::NotStarted {
                self.runner.run(ctx, task).await?;
            }
        }
        Ok(())
    }

    /// Conclude the workflow once its roots allow it
    async fn conclude(&self, ctx: &TenantContext, workflow: &mut WorkflowInstance) -> EngineResult<()> {
        let roots = ctx.store.root_groups(workflow.id).await?;
        let tasks = ctx.store.top_level_tasks(workflow.id).await?;

        let nodes: Vec<(&'static str, Uuid, TaskStatus)> = roots
            .iter()
            .map(|g| ("Root group", g.id, g.status))
            .chain(tasks.iter().map(|t| ("Task", t.id, t.status)))
            .collect();

        if let Some((kind, id, status)) = nodes.iter().find(|(_, _, s)| is_terminal_failure(*s)) {
            let reason = format!("{} {} {}", kind, id, status);
            return self
                .finish(ctx, workflow, WorkflowStatus::Failed, Some(reason))
                .await;
        }
        if nodes.iter().all(|(_, _, s)| is_terminal(*s)) {
            return self
                .finish(ctx, workflow, WorkflowStatus::Completed, None)
                .await;
        }
        Ok(())
    }

    async fn finish(
        &self,
        ctx: &TenantContext,
        workflow: &mut WorkflowInstance,
        status: WorkflowStatus,
        reason: Option<String>,
    ) -> EngineResult<()> {
        if !workflow.status.can_transition_to(status) {
            return Err(EngineError::IllegalState(format!(
                "Workflow {} cannot move from {} to {}",
                workflow.id, workflow.status, status
            )));
        }
        workflow.set_status(status);
        workflow.status_reason = reason;
        ctx.store.update_workflow(workflow).await?;
        match &workflow.status_reason {
            Some(reason) => warn!(workflow_id = %workflow.id, status = %status, "Workflow concluded: {}", reason),
            None => info!(workflow_id = %workflow.id, status = %status, "Workflow concluded"),
        }
        Ok(())
    }

    async fn force_failure(&self, ctx: &TenantContext, workflow_id: Uuid, err: &EngineError) {
        match ctx.store.get_workflow(workflow_id).await {
            Ok(Some(mut workflow)) if workflow.status.can_transition_to(WorkflowStatus::Failed) => {
                workflow.set_status(WorkflowStatus::Failed);
                workflow.status_reason = Some(format!("Reconciliation failed: {}", err));
                if let Err(e) = ctx.store.update_workflow(&workflow).await {
                    error!("Could not force workflow to FAILED: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => error!("Could not load workflow to force failure: {}", e),
        }
        if let Err(e) = ctx.queue.remove(workflow_id).await {
            error!("Could not remove queue entry: {}", e);
        }
    }
}

/// Configuration for the workflow engine
#[derive(Debug, Clone, Default)]
pub struct WorkflowEngineConfig {
    /// Sweep loop configuration
    pub sweeper: SweeperConfig,
}

impl From<&EngineSettings> for WorkflowEngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            sweeper: SweeperConfig::from(settings),
        }
    }
}

/// Entry point bundling the decision engine, control operations and sweeper
#[derive(Clone)]
pub struct WorkflowEngine {
    /// Unique ID of the workflow engine
    id: String,

    /// Configuration for the workflow engine
    config: Arc<WorkflowEngineConfig>,

    decisions: Arc<DecisionEngine>,
    control: WorkflowControl,
    sweeper: Arc<Sweeper>,
}

impl WorkflowEngine {
    /// Create a new workflow engine
    pub fn new(
        config: WorkflowEngineConfig,
        registry: TaskHandlerRegistry,
        directory: Arc<dyn TenantDirectory>,
    ) -> Self {
        let runner = TaskRunner::new(Arc::new(registry));
        let decisions = Arc::new(DecisionEngine::new(runner.clone()));
        let control = WorkflowControl::new(runner);
        let sweeper = Arc::new(Sweeper::new(
            config.sweeper.clone(),
            Arc::clone(&decisions),
            control.clone(),
            directory,
        ));

        Self {
            id: Uuid::new_v4().to_string(),
            config: Arc::new(config),
            decisions,
            control,
            sweeper,
        }
    }

    /// Get the ID of the workflow engine
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Engine configuration
    pub fn config(&self) -> &WorkflowEngineConfig {
        &self.config
    }

    /// Decision engine
    pub fn decisions(&self) -> &DecisionEngine {
        &self.decisions
    }

    /// Task and workflow control operations
    pub fn control(&self) -> &WorkflowControl {
        &self.control
    }

    /// Sweeper driving this engine
    pub fn sweeper(&self) -> &Arc<Sweeper> {
        &self.sweeper
    }

    /// Queue a workflow instance for a reconciliation pass
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn start_reconciliation_for(
        &self,
        ctx: &TenantContext,
        workflow_id: Uuid,
    ) -> EngineResult<()> {
        if ctx.store.get_workflow(workflow_id).await?.is_none() {
            return Err(EngineError::workflow_not_found(workflow_id));
        }
        ctx.queue.enqueue(workflow_id, DEFAULT_PRIORITY).await?;
        Ok(())
    }

    /// Request an out-of-cycle sweep
    pub fn force_sweep(&self) {
        self.sweeper.trigger();
    }

    /// Reconcile one workflow immediately, outside the sweep loop.
    ///
    /// Takes the same instance lease as sweeper passes. While another pass
    /// holds it this returns [`ReconcileOutcome::Busy`] and leaves the queue
    /// entry for a later cycle.
    pub async fn reconcile_now(&self, ctx: &TenantContext, workflow_id: Uuid) -> ReconcileOutcome {
        let Some(_lease) = self.sweeper.leases().try_acquire(&ctx.tenant, workflow_id) else {
            debug!(tenant = %ctx.tenant, workflow_id = %workflow_id, "Pass already in flight");
            return ReconcileOutcome::Busy;
        };
        self.decisions.decide(ctx, workflow_id, None).await
    }

    /// Run a single sweep cycle and wait for its passes
    pub async fn sweep_once(&self) -> SweepReport {
        self.sweeper.sweep_once().await
    }

    /// Run the sweep loop on the runtime until [`WorkflowEngine::shutdown`]
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let sweeper = Arc::clone(&self.sweeper);
        tokio::spawn(async move { sweeper.run().await })
    }

    /// Stop the sweep loop after its current cycle and in-flight passes
    pub fn shutdown(&self) {
        self.sweeper.shutdown();
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
