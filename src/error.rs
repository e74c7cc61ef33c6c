//! Error types for the workflow executor
//!
//! Validation, not-found and illegal-state errors are returned synchronously to
//! the caller of an operation. Transport failures of HTTP tasks and failures
//! inside a reconciliation pass are absorbed into task and workflow state and
//! never surface through this type past the sweeper.

use thiserror::Error;
use uuid::Uuid;

/// A specialized Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Represents errors that can occur while driving workflow instances.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing definition references, rejected before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced instance or definition does not resolve
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up
        kind: &'static str,
        /// Identifier that did not resolve
        id: String,
    },

    /// Operation attempted against an entity in an incompatible status
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Outbound network failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The persistence collaborator failed
    #[error("Store error: {0}")]
    Store(String),

    /// Settings could not be loaded or failed validation
    #[error("Config error: {0}")]
    Config(String),

    /// IO error while reading settings
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML settings parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Not-found error for a workflow instance
    pub fn workflow_not_found(id: Uuid) -> Self {
        EngineError::NotFound {
            kind: "Workflow instance",
            id: id.to_string(),
        }
    }

    /// Not-found error for a task instance
    pub fn task_not_found(id: Uuid) -> Self {
        EngineError::NotFound {
            kind: "Task instance",
            id: id.to_string(),
        }
    }

    /// Not-found error for a task group instance
    pub fn group_not_found(id: Uuid) -> Self {
        EngineError::NotFound {
            kind: "Task group instance",
            id: id.to_string(),
        }
    }

    /// Not-found error for a task or group definition
    pub fn definition_not_found(kind: &'static str, id: Uuid) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the error was caused by the caller rather than the engine
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::NotFound { .. } | EngineError::IllegalState(_)
        )
    }
}
