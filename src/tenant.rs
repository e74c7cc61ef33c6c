//! Tenant identity and per-tenant resource scopes
//!
//! Every engine operation receives the tenant context it acts on as an
//! explicit argument. A [`TenantScope`] is the per-pass handle on that
//! context; dropping it releases the scope whichever way the pass ended.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::execution::queue::{ExecutionQueue, InMemoryExecutionQueue};
use crate::store::{DefinitionProvider, InMemoryDefinitions, MemoryStore, WorkflowStore};

/// Identifier of a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Tenant id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collaborators serving one tenant
#[derive(Clone)]
pub struct TenantContext {
    /// Tenant these collaborators belong to
    pub tenant: TenantId,
    /// Entity store
    pub store: Arc<dyn WorkflowStore>,
    /// Definition provider
    pub definitions: Arc<dyn DefinitionProvider>,
    /// Execution queue
    pub queue: Arc<dyn ExecutionQueue>,
}

impl TenantContext {
    /// Assemble a tenant context
    pub fn new(
        tenant: TenantId,
        store: Arc<dyn WorkflowStore>,
        definitions: Arc<dyn DefinitionProvider>,
        queue: Arc<dyn ExecutionQueue>,
    ) -> Self {
        Self {
            tenant,
            store,
            definitions,
            queue,
        }
    }

    /// Tenant context backed entirely by in-memory collaborators
    pub fn in_memory(tenant: TenantId) -> Self {
        Self::new(
            tenant,
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryDefinitions::new()),
            Arc::new(InMemoryExecutionQueue::new()),
        )
    }
}

impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

/// A tenant context checked out for the duration of one pass
#[derive(Debug)]
pub struct TenantScope {
    context: TenantContext,
    active: Arc<AtomicUsize>,
}

impl TenantScope {
    /// Context this scope grants access to
    pub fn context(&self) -> &TenantContext {
        &self.context
    }
}

impl Drop for TenantScope {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!(tenant = %self.context.tenant, "Tenant scope released");
    }
}

/// Lookup of the tenants served by a sweeper
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Tenants to visit on each sweep
    async fn tenants(&self) -> EngineResult<Vec<TenantId>>;

    /// Check out a scope for one tenant
    async fn acquire(&self, tenant: &TenantId) -> EngineResult<TenantScope>;

    /// Scopes currently checked out
    fn active_scopes(&self) -> usize;
}

/// Fixed set of tenants known at construction
#[derive(Debug, Default)]
pub struct StaticTenantDirectory {
    contexts: HashMap<TenantId, TenantContext>,
    active: Arc<AtomicUsize>,
}

impl StaticTenantDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory with an in-memory context per tenant id
    pub fn in_memory<I, S>(tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tenants.into_iter().fold(Self::new(), |directory, id| {
            directory.with_tenant(TenantContext::in_memory(TenantId::new(id)))
        })
    }

    /// Register a tenant context
    pub fn with_tenant(mut self, context: TenantContext) -> Self {
        self.contexts.insert(context.tenant.clone(), context);
        self
    }

    /// Context registered for a tenant
    pub fn context(&self, tenant: &TenantId) -> Option<&TenantContext> {
        self.contexts.get(tenant)
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn tenants(&self) -> EngineResult<Vec<TenantId>> {
        let mut tenants: Vec<TenantId> = self.contexts.keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn acquire(&self, tenant: &TenantId) -> EngineResult<TenantScope> {
        let context = self.contexts.get(tenant).cloned().ok_or(EngineError::NotFound {
            kind: "Tenant",
            id: tenant.to_string(),
        })?;
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(TenantScope {
            context,
            active: Arc::clone(&self.active),
        })
    }

    fn active_scopes(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scope_released_on_drop() {
        let directory = StaticTenantDirectory::in_memory(["b", "a"]);
        assert_eq!(
            directory.tenants().await.unwrap(),
            vec![TenantId::new("a"), TenantId::new("b")]
        );

        let scope = directory.acquire(&TenantId::new("a")).await.unwrap();
        assert_eq!(scope.context().tenant.as_str(), "a");
        assert_eq!(directory.active_scopes(), 1);
        drop(scope);
        assert_eq!(directory.active_scopes(), 0);
    }

    #[test]
    fn test_in_memory_tenants_are_isolated() {
        tokio_test::block_on(async {
            let directory = StaticTenantDirectory::in_memory(["a", "b"]);
            let a = directory.context(&TenantId::new("a")).unwrap();
            let b = directory.context(&TenantId::new("b")).unwrap();

            let workflow = crate::workflow::model::WorkflowInstance::new(uuid::Uuid::new_v4(), None);
            a.store.create_workflow(&workflow).await.unwrap();
            assert!(a.store.get_workflow(workflow.id).await.unwrap().is_some());
            assert!(b.store.get_workflow(workflow.id).await.unwrap().is_none());
        });
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let directory = StaticTenantDirectory::new();
        let err = directory.acquire(&TenantId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "Tenant", .. }));
    }
}
