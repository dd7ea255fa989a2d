//! State backend trait definition.
//!
//! [`StateBackend`] defines the storage contract for cursor state, run
//! history, rejected rows, and per-resource run leases. Model types live
//! in [`pagesync_types::state`].

use pagesync_types::protocol::StateDocument;
use pagesync_types::record::Rejection;
use pagesync_types::state::{ConnectorId, CursorState, ResourceName, RunStatus, SyncRun};

use crate::error;

/// A finished or in-flight run as stored in run history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub resource: String,
    pub status: RunStatus,
    pub rows_emitted: u64,
    pub rows_rejected: u64,
    pub rows_skipped: u64,
    pub error: Option<String>,
}

/// Storage contract for connector state.
///
/// Cursor values are stored as opaque JSON. Decoding happens in the
/// caller so a malformed value fails only the resource it belongs to.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Read the stored cursor value for a (connector, resource) pair.
    ///
    /// Returns `Ok(None)` when no cursor has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_cursor(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
    ) -> error::Result<Option<serde_json::Value>>;

    /// Atomically replace the cursor for a (connector, resource) pair.
    ///
    /// Either the whole new value is visible afterwards or the previous
    /// one is; never a mix.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn set_cursor(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        cursor: &CursorState,
    ) -> error::Result<()>;

    /// Every stored cursor of a connector, keyed by resource name.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn export_state(&self, connector: &ConnectorId) -> error::Result<StateDocument>;

    /// Begin a new sync run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_run(&self, connector: &ConnectorId, resource: &ResourceName) -> error::Result<i64>;

    /// Finalize a sync run with its terminal status and counters.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, run: &SyncRun) -> error::Result<()>;

    /// Most recent runs of a connector, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_runs(&self, connector: &ConnectorId, limit: usize) -> error::Result<Vec<RunRecord>>;

    /// Persist rejected rows of a run. Returns the count inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_rejections(
        &self,
        connector: &ConnectorId,
        run_id: i64,
        resource: &ResourceName,
        rejections: &[Rejection],
    ) -> error::Result<u64>;

    /// Take the single-writer lease for a resource.
    ///
    /// Returns `false` if another owner already holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn try_acquire_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<bool>;

    /// Refresh a lease held by `owner` so it does not expire under a
    /// long run.
    ///
    /// Returns `false` if `owner` no longer holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn renew_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<bool>;

    /// Release a lease previously taken by `owner`. Releasing a lease
    /// held by someone else is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn release_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn StateBackend`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn StateBackend) {}
    }
}
