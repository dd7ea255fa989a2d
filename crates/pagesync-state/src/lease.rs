//! Single-writer run leases.
//!
//! A [`RunLease`] is held for the duration of one resource's sync run and
//! released on drop, so two invocations never write the same cursor
//! concurrently. Holders call [`RunLease::renew`] at least every
//! [`LEASE_RENEW_INTERVAL`] so backends that expire abandoned leases never
//! expire a live one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pagesync_types::state::{ConnectorId, ResourceName};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// How often a running sync refreshes its lease.
pub const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(60);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

fn owner_token() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Guard for an acquired per-resource lease.
pub struct RunLease {
    backend: Arc<dyn StateBackend>,
    connector: ConnectorId,
    resource: ResourceName,
    owner: String,
}

impl RunLease {
    /// Acquire the lease for `resource` or fail immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::RunAlreadyInProgress`] if the lease is held
    /// elsewhere, or a storage error from the backend.
    pub fn acquire(
        backend: Arc<dyn StateBackend>,
        connector: &ConnectorId,
        resource: &ResourceName,
    ) -> error::Result<Self> {
        let owner = owner_token();
        if !backend.try_acquire_lease(connector, resource, &owner)? {
            return Err(StateError::RunAlreadyInProgress(resource.to_string()));
        }
        Ok(Self {
            backend,
            connector: connector.clone(),
            resource: resource.clone(),
            owner,
        })
    }

    /// Refresh the lease.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LeaseLost`] if the lease was released or
    /// reclaimed by another owner, or a storage error from the backend.
    pub fn renew(&self) -> error::Result<()> {
        if self
            .backend
            .renew_lease(&self.connector, &self.resource, &self.owner)?
        {
            Ok(())
        } else {
            Err(StateError::LeaseLost(self.resource.to_string()))
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn resource(&self) -> &ResourceName {
        &self.resource
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if let Err(e) = self
            .backend
            .release_lease(&self.connector, &self.resource, &self.owner)
        {
            tracing::warn!(resource = %self.resource, error = %e, "failed to release run lease");
        }
    }
}

impl std::fmt::Debug for RunLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLease")
            .field("connector", &self.connector)
            .field("resource", &self.resource)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
