use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::tenant::TenantId;

type LeaseKey = (TenantId, Uuid);

/// Single-flight leases keyed by tenant and workflow instance.
///
/// A workflow instance holds at most one lease at a time; the lease is
/// released when its [`InstanceLease`] guard drops.
#[derive(Debug, Clone, Default)]
pub struct InstanceLeases {
    held: Arc<Mutex<HashSet<LeaseKey>>>,
}

impl InstanceLeases {
    /// Create an empty lease table
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lease for a workflow instance
    pub fn try_acquire(&self, tenant: &TenantId, workflow_id: Uuid) -> Option<InstanceLease> {
        let key = (tenant.clone(), workflow_id);
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.insert(key.clone()) {
            debug!(tenant = %tenant, workflow_id = %workflow_id, "Lease already held");
            return None;
        }
        Some(InstanceLease {
            key,
            held: Arc::clone(&self.held),
        })
    }

    /// Whether a lease is currently held for a workflow instance
    pub fn is_held(&self, tenant: &TenantId, workflow_id: Uuid) -> bool {
        let held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.contains(&(tenant.clone(), workflow_id))
    }

    /// Number of leases currently held
    pub fn held_count(&self) -> usize {
        match self.held.lock() {
            Ok(held) => held.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Guard for a held lease
#[derive(Debug)]
pub struct InstanceLease {
    key: LeaseKey,
    held: Arc<Mutex<HashSet<LeaseKey>>>,
}

impl InstanceLease {
    /// Workflow instance this lease covers
    pub fn workflow_id(&self) -> Uuid {
        self.key.1
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        match self.held.lock() {
            Ok(mut held) => {
                held.remove(&self.key);
            }
            Err(poisoned) => {
                warn!(workflow_id = %self.key.1, "Lease table poisoned; releasing anyway");
                poisoned.into_inner().remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight() {
        let leases = InstanceLeases::new();
        let tenant = TenantId::new("acme");
        let id = Uuid::new_v4();

        let lease = leases.try_acquire(&tenant, id).unwrap();
        assert!(leases.try_acquire(&tenant, id).is_none());
        assert!(leases.is_held(&tenant, id));

        // other tenants are independent
        assert!(leases.try_acquire(&TenantId::new("other"), id).is_some());

        drop(lease);
        assert!(!leases.is_held(&tenant, id));
        assert!(leases.try_acquire(&tenant, id).is_some());
    }
}
