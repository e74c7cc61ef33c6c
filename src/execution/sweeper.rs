//! Recurring, tenant-aware dispatcher for the execution queue
//!
//! Each cycle visits every tenant, lists its pending work and hands each
//! entry to the decision engine on a bounded worker pool. Permits are
//! requested with a short timeout; once the pool is saturated the rest of
//! that tenant's batch waits for the next cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::lease::{InstanceLease, InstanceLeases};
use crate::config::{EngineSettings, HousekeepingSettings};
use crate::tenant::{TenantContext, TenantDirectory, TenantId};
use crate::telemetry::add_metric;
use crate::workflow::control::WorkflowControl;
use crate::workflow::engine::{DecisionEngine, ReconcileOutcome};

/// Configuration for the sweep loop
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between cycles
    pub interval: Duration,
    /// Size of the worker pool
    pub max_concurrency: usize,
    /// How long a dispatch waits for a worker permit
    pub permit_timeout: Duration,
    /// Whether cycles after the first also pick up `PROCESSING` entries
    pub recover_processing: bool,
    /// Maintenance run per tenant each cycle
    pub housekeeping: HousekeepingSettings,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for SweeperConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            interval: settings.sweeper.interval(),
            max_concurrency: settings.sweeper.max_concurrency.max(1),
            permit_timeout: settings.sweeper.permit_timeout(),
            recover_processing: settings.sweeper.recover_processing,
            housekeeping: settings.housekeeping.clone(),
        }
    }
}

/// Counters for one sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tenants visited
    pub tenants: usize,
    /// Passes handed to a worker
    pub dispatched: usize,
    /// Entries left for a later cycle because the pool was saturated
    pub skipped_saturated: usize,
    /// Entries left for a later cycle because a pass already holds the lease
    pub skipped_leased: usize,
    /// Passes that forced their workflow to `FAILED`
    pub forced_failures: usize,
    /// Tenants whose batch could not be listed or whose scope was unavailable
    pub tenant_errors: usize,
    /// Tasks expired by housekeeping
    pub expired_tasks: usize,
    /// Workflows archived by housekeeping
    pub archived_workflows: usize,
}

struct Dispatch {
    workflow_id: Uuid,
    handle: JoinHandle<ReconcileOutcome>,
}

/// Drains the execution queue of every tenant under bounded concurrency
pub struct Sweeper {
    config: SweeperConfig,
    decisions: Arc<DecisionEngine>,
    control: WorkflowControl,
    directory: Arc<dyn TenantDirectory>,
    permits: Arc<Semaphore>,
    leases: InstanceLeases,
    first_sweep: AtomicBool,
    trigger: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl Sweeper {
    /// Create a sweeper
    pub fn new(
        config: SweeperConfig,
        decisions: Arc<DecisionEngine>,
        control: WorkflowControl,
        directory: Arc<dyn TenantDirectory>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            decisions,
            control,
            directory,
            permits,
            leases: InstanceLeases::new(),
            first_sweep: AtomicBool::new(true),
            trigger: Notify::new(),
            shutdown_tx,
        }
    }

    /// Sweeper configuration
    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Per-instance leases held by running passes
    pub fn leases(&self) -> &InstanceLeases {
        &self.leases
    }

    /// Worker permits currently free
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Request an out-of-cycle sweep
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the loop started by [`Sweeper::run`]
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Run sweep cycles until shutdown is requested.
    ///
    /// Passes started by a cycle keep running while later cycles dispatch
    /// other work; the worker pool and the instance leases bound them.
    /// Passes still in flight at shutdown are awaited before returning.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_concurrency = self.config.max_concurrency,
            "Sweeper started"
        );

        let mut in_flight: Vec<Dispatch> = Vec::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.trigger.notified() => debug!("Forced sweep requested"),
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            in_flight.retain(|dispatch| !dispatch.handle.is_finished());
            let (report, dispatches) = self.start_cycle().await;
            in_flight.extend(dispatches);
            debug!(?report, in_flight = in_flight.len(), "Sweep cycle dispatched");

            if *shutdown_rx.borrow() {
                break;
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Waiting for in-flight passes");
            Self::collect(in_flight).await;
        }
        info!("Sweeper stopped");
    }

    /// Run one cycle over every tenant and wait for the passes it started
    pub async fn sweep_once(&self) -> SweepReport {
        let (mut report, dispatches) = self.start_cycle().await;
        report.forced_failures += Self::collect(dispatches).await;
        report
    }

    /// Dispatch one cycle's passes without waiting for them
    async fn start_cycle(&self) -> (SweepReport, Vec<Dispatch>) {
        let started = Instant::now();
        let first = self.first_sweep.swap(false, Ordering::SeqCst);
        let mut report = SweepReport::default();

        let tenants = match self.directory.tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Could not list tenants: {}", e);
                report.tenant_errors += 1;
                return (report, Vec::new());
            }
        };

        let mut dispatches = Vec::new();
        for tenant in tenants {
            report.tenants += 1;
            match self.sweep_tenant(&tenant, first, &mut report).await {
                Ok(batch) => dispatches.extend(batch),
                Err(e) => {
                    warn!(tenant = %tenant, "Skipping tenant this cycle: {}", e);
                    report.tenant_errors += 1;
                }
            }
        }

        add_metric("sweep_dispatched", report.dispatched as f64, &[]);
        add_metric(
            "sweep_skipped",
            (report.skipped_saturated + report.skipped_leased) as f64,
            &[],
        );
        add_metric(
            "sweep_duration_ms",
            started.elapsed().as_millis() as f64,
            &[("first", first.to_string())],
        );
        (report, dispatches)
    }

    /// Await dispatched passes; returns how many forced their workflow to `FAILED`
    async fn collect(dispatches: Vec<Dispatch>) -> usize {
        let (ids, handles): (Vec<Uuid>, Vec<_>) = dispatches
            .into_iter()
            .map(|dispatch| (dispatch.workflow_id, dispatch.handle))
            .unzip();
        let mut forced_failures = 0;
        for (workflow_id, joined) in ids.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(ReconcileOutcome::ForcedFailure(_)) => forced_failures += 1,
                Ok(_) => {}
                Err(e) => error!(workflow_id = %workflow_id, "Reconciliation pass panicked: {}", e),
            }
        }
        forced_failures
    }

    async fn sweep_tenant(
        &self,
        tenant: &TenantId,
        first: bool,
        report: &mut SweepReport,
    ) -> crate::error::EngineResult<Vec<Dispatch>> {
        let scope = self.directory.acquire(tenant).await?;
        let ctx = scope.context().clone();
        drop(scope);

        self.housekeeping(&ctx, report).await;

        // the first cycle has no baseline and leaves PROCESSING entries alone
        let (since, include_processing) = if first {
            (None, false)
        } else {
            (
                ctx.queue.latest_processing_timestamp().await?,
                self.config.recover_processing,
            )
        };

        let pending = ctx.queue.list_pending(include_processing).await?;
        debug!(tenant = %tenant, pending = pending.len(), "Pending work listed");

        let mut dispatches = Vec::with_capacity(pending.len());
        for (index, entry) in pending.iter().enumerate() {
            let Some(lease) = self.leases.try_acquire(tenant, entry.workflow_instance_id) else {
                report.skipped_leased += 1;
                continue;
            };

            let permit = match self.acquire_permit().await {
                Some(permit) => permit,
                None => {
                    let remaining = pending.len() - index;
                    warn!(tenant = %tenant, remaining, "Worker pool saturated; deferring batch");
                    report.skipped_saturated += remaining;
                    break;
                }
            };

            dispatches.push(self.dispatch(tenant.clone(), entry.workflow_instance_id, since, lease, permit));
            report.dispatched += 1;
        }

        add_metric(
            "sweep_tenant_dispatched",
            dispatches.len() as f64,
            &[("tenant", tenant.to_string())],
        );
        Ok(dispatches)
    }

    async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        match tokio::time::timeout(
            self.config.permit_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Some(permit),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    fn dispatch(
        &self,
        tenant: TenantId,
        workflow_id: Uuid,
        since: Option<DateTime<Utc>>,
        lease: InstanceLease,
        permit: OwnedSemaphorePermit,
    ) -> Dispatch {
        let decisions = Arc::clone(&self.decisions);
        let directory = Arc::clone(&self.directory);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let _lease = lease;
            let scope = match directory.acquire(&tenant).await {
                Ok(scope) => scope,
                Err(e) => {
                    error!(tenant = %tenant, workflow_id = %workflow_id, "No tenant scope for pass: {}", e);
                    return ReconcileOutcome::Inert;
                }
            };
            decisions.decide(scope.context(), workflow_id, since).await
        });
        Dispatch { workflow_id, handle }
    }

    async fn housekeeping(&self, ctx: &TenantContext, report: &mut SweepReport) {
        let settings = &self.config.housekeeping;

        if settings.expire_overdue_tasks {
            match self.control.expire_overdue_tasks(ctx, Utc::now()).await {
                Ok(count) => report.expired_tasks += count,
                Err(e) => warn!(tenant = %ctx.tenant, "Overdue task expiry failed: {}", e),
            }
        }

        if let Some(secs) = settings.archive_after_secs {
            match self
                .control
                .archive_terminal_workflows(ctx, Duration::from_secs(secs))
                .await
            {
                Ok(count) => report.archived_workflows += count,
                Err(e) => warn!(tenant = %ctx.tenant, "Archive sweep failed: {}", e),
            }
        }

        if let Err(e) = self
            .control
            .cleanup_queue(ctx, Duration::from_secs(settings.queue_retention_secs))
            .await
        {
            warn!(tenant = %ctx.tenant, "Queue cleanup failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("config", &self.config)
            .field("available_permits", &self.permits.available_permits())
            .field("leases_held", &self.leases.held_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings() {
        let mut settings = EngineSettings::default();
        settings.sweeper.max_concurrency = 3;
        settings.sweeper.permit_timeout_ms = 20;
        settings.housekeeping.archive_after_secs = Some(60);

        let config = SweeperConfig::from(&settings);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.permit_timeout, Duration::from_millis(20));
        assert_eq!(config.interval, Duration::from_secs(10));
        assert!(config.recover_processing);
        assert_eq!(config.housekeeping.archive_after_secs, Some(60));
    }
}
