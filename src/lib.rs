#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! Workflow executor: a hierarchical workflow execution engine.
//!
//! Workflow instances own trees of task groups and tasks. Sequential
//! (vertical) groups run their children one at a time; parallel (horizontal)
//! groups start every child and complete under an ALL, ANY or N-of-M
//! criterion. A sweeper drains a priority-ordered execution queue per tenant
//! and runs one reconciliation pass per queued workflow on a bounded worker
//! pool.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use workflow_executor::tenant::{StaticTenantDirectory, TenantId};
//! use workflow_executor::workflow::{TaskHandlerRegistry, WorkflowEngine, WorkflowEngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(StaticTenantDirectory::in_memory(["acme"]));
//!     let ctx = directory.context(&TenantId::new("acme")).cloned().ok_or("no tenant")?;
//!
//!     let engine = WorkflowEngine::new(
//!         WorkflowEngineConfig::default(),
//!         TaskHandlerRegistry::human_only(),
//!         directory,
//!     );
//!
//!     // ... create a workflow instance and its tree through `ctx.store` ...
//!     # let workflow_id = uuid::Uuid::new_v4();
//!     engine.control().start_workflow(&ctx, workflow_id).await?;
//!     let report = engine.sweep_once().await;
//!     println!("dispatched {} passes", report.dispatched);
//!     Ok(())
//! }
//! ```

/// Settings loading
pub mod config;

/// Error types for the workflow executor
pub mod error;

/// Execution queue, leases and the sweeper
pub mod execution;

/// Outbound HTTP collaborator used by HTTP tasks
pub mod http;

/// Persistence and definition collaborators
pub mod store;

/// Logging and metric helpers
pub mod telemetry;

/// Tenant identity and scopes
pub mod tenant;

/// Workflow state, handlers and the decision engine
pub mod workflow;

// Re-export error types
pub use error::{EngineError, EngineResult};

/// Re-export telemetry types and functions for easier access
pub use telemetry::{add_metric, add_metrics, init_telemetry, span_duration, TelemetryConfig};

pub use execution::{SweepReport, Sweeper, SweeperConfig};
pub use tenant::{StaticTenantDirectory, TenantContext, TenantDirectory, TenantId};
pub use workflow::{WorkflowControl, WorkflowEngine, WorkflowEngineConfig};
