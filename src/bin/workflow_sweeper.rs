//! Runs the sweeper over an in-memory tenant directory until Ctrl-C
//!
//! Usage: `workflow-sweeper [CONFIG_PATH]`. Without a path the default
//! settings locations are searched and defaults apply when none exists.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use workflow_executor::config::get_settings;
use workflow_executor::http::ReqwestTransport;
use workflow_executor::telemetry::{init_telemetry, TelemetryConfig};
use workflow_executor::tenant::StaticTenantDirectory;
use workflow_executor::workflow::{TaskHandlerRegistry, WorkflowEngine, WorkflowEngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let settings = get_settings(config_path.as_deref()).context("Failed to load settings")?;

    let mut telemetry = TelemetryConfig::from(&settings.logger);
    telemetry.service_name = "workflow-sweeper".to_string();
    init_telemetry(telemetry).context("Failed to initialize telemetry")?;

    let transport = ReqwestTransport::new(Duration::from_secs(settings.http.connect_timeout_secs))
        .context("Failed to build HTTP transport")?;
    let registry = TaskHandlerRegistry::with_defaults(
        Arc::new(transport),
        Duration::from_secs(settings.http.default_timeout_secs),
    );
    let directory = Arc::new(StaticTenantDirectory::in_memory(settings.tenants.clone()));

    let engine = WorkflowEngine::new(WorkflowEngineConfig::from(&settings), registry, directory);
    info!(
        engine_id = engine.id(),
        tenants = ?settings.tenants,
        "Starting workflow sweeper"
    );

    let handle = engine.spawn_sweeper();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    engine.shutdown();
    handle.await.context("Sweeper task failed")?;
    Ok(())
}
