//! In-memory [`StateBackend`], seeded from a request's state document.
//!
//! Used by the protocol adapter: the caller owns persistence and hands
//! the state back on every invocation, so nothing here outlives the
//! process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use pagesync_types::protocol::StateDocument;
use pagesync_types::record::Rejection;
use pagesync_types::state::{ConnectorId, CursorState, ResourceName, RunStatus, SyncRun};

use crate::backend::{RunRecord, StateBackend};
use crate::error::{self, StateError};

#[derive(Default)]
struct Inner {
    cursors: HashMap<String, StateDocument>,
    runs: Vec<(String, RunRecord)>,
    rejections: Vec<(i64, Rejection)>,
    leases: HashMap<(String, String), String>,
}

/// Process-local state storage.
#[derive(Default)]
pub struct MemoryStateBackend {
    inner: Mutex<Inner>,
}

impl MemoryStateBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose cursors for `connector` start as `state`.
    ///
    /// Entries are kept verbatim, including ones for resources that are
    /// no longer declared.
    #[must_use]
    pub fn seeded(connector: &ConnectorId, state: StateDocument) -> Self {
        let mut inner = Inner::default();
        inner.cursors.insert(connector.as_str().to_string(), state);
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> error::Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Number of rejected rows persisted for a run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockPoisoned`] if the lock is poisoned.
    pub fn rejection_count(&self, run_id: i64) -> error::Result<usize> {
        Ok(self
            .lock()?
            .rejections
            .iter()
            .filter(|(id, _)| *id == run_id)
            .count())
    }
}

impl StateBackend for MemoryStateBackend {
    fn get_cursor(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
    ) -> error::Result<Option<serde_json::Value>> {
        Ok(self
            .lock()?
            .cursors
            .get(connector.as_str())
            .and_then(|doc| doc.get(resource.as_str()))
            .cloned())
    }

    fn set_cursor(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        cursor: &CursorState,
    ) -> error::Result<()> {
        let value = serde_json::to_value(cursor)?;
        self.lock()?
            .cursors
            .entry(connector.as_str().to_string())
            .or_default()
            .insert(resource.as_str().to_string(), value);
        Ok(())
    }

    fn export_state(&self, connector: &ConnectorId) -> error::Result<StateDocument> {
        Ok(self
            .lock()?
            .cursors
            .get(connector.as_str())
            .cloned()
            .unwrap_or_else(BTreeMap::new))
    }

    fn start_run(&self, connector: &ConnectorId, resource: &ResourceName) -> error::Result<i64> {
        let mut inner = self.lock()?;
        let id = i64::try_from(inner.runs.len()).unwrap_or(i64::MAX - 1) + 1;
        inner.runs.push((
            connector.as_str().to_string(),
            RunRecord {
                id,
                resource: resource.as_str().to_string(),
                status: RunStatus::Running,
                rows_emitted: 0,
                rows_rejected: 0,
                rows_skipped: 0,
                error: None,
            },
        ));
        Ok(id)
    }

    fn complete_run(&self, run_id: i64, run: &SyncRun) -> error::Result<()> {
        let mut inner = self.lock()?;
        if let Some((_, record)) = inner.runs.iter_mut().find(|(_, r)| r.id == run_id) {
            record.status = run.status;
            record.rows_emitted = run.rows_emitted;
            record.rows_rejected = run.rows_rejected;
            record.rows_skipped = run.rows_skipped;
            record.error = run.error.as_ref().map(ToString::to_string);
        }
        Ok(())
    }

    fn list_runs(&self, connector: &ConnectorId, limit: usize) -> error::Result<Vec<RunRecord>> {
        Ok(self
            .lock()?
            .runs
            .iter()
            .rev()
            .filter(|(c, _)| c == connector.as_str())
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn insert_rejections(
        &self,
        _connector: &ConnectorId,
        run_id: i64,
        _resource: &ResourceName,
        rejections: &[Rejection],
    ) -> error::Result<u64> {
        let mut inner = self.lock()?;
        inner
            .rejections
            .extend(rejections.iter().cloned().map(|r| (run_id, r)));
        Ok(rejections.len() as u64)
    }

    fn try_acquire_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<bool> {
        let mut inner = self.lock()?;
        let key = (connector.as_str().to_string(), resource.as_str().to_string());
        if inner.leases.contains_key(&key) {
            return Ok(false);
        }
        tracing::trace!(resource = %resource, owner, "lease acquired");
        inner.leases.insert(key, owner.to_string());
        Ok(true)
    }

    fn renew_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<bool> {
        let inner = self.lock()?;
        let key = (connector.as_str().to_string(), resource.as_str().to_string());
        Ok(inner.leases.get(&key).is_some_and(|held| held == owner))
    }

    fn release_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> error::Result<()> {
        let mut inner = self.lock()?;
        let key = (connector.as_str().to_string(), resource.as_str().to_string());
        if inner.leases.get(&key).is_some_and(|held| held == owner) {
            inner.leases.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> ConnectorId {
        ConnectorId::new("reddit")
    }

    #[test]
    fn missing_cursor_is_none() {
        let backend = MemoryStateBackend::new();
        assert!(backend
            .get_cursor(&cid(), &ResourceName::new("users"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn seeded_state_is_exported_verbatim() {
        let mut doc = StateDocument::new();
        doc.insert("users".into(), serde_json::json!({"cursor": "a"}));
        doc.insert("retired".into(), serde_json::json!("opaque"));
        let backend = MemoryStateBackend::seeded(&cid(), doc.clone());
        assert_eq!(backend.export_state(&cid()).unwrap(), doc);
    }

    #[test]
    fn set_cursor_overwrites_entry() {
        let backend = MemoryStateBackend::new();
        let users = ResourceName::new("users");
        backend
            .set_cursor(&cid(), &users, &CursorState::initial().with_cursor("1"))
            .unwrap();
        backend
            .set_cursor(&cid(), &users, &CursorState::initial().with_cursor("2"))
            .unwrap();
        let stored = backend.get_cursor(&cid(), &users).unwrap().unwrap();
        assert_eq!(stored["cursor"], "2");
        assert_eq!(stored["version"], 1);
    }

    #[test]
    fn runs_listed_newest_first() {
        let backend = MemoryStateBackend::new();
        let users = ResourceName::new("users");
        let first = backend.start_run(&cid(), &users).unwrap();
        let second = backend.start_run(&cid(), &users).unwrap();
        let mut run = SyncRun::start(users, CursorState::initial());
        run.rows_emitted = 3;
        backend.complete_run(first, &run.complete()).unwrap();

        let runs = backend.list_runs(&cid(), 10).unwrap();
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[1].status, RunStatus::Complete);
        assert_eq!(runs[1].rows_emitted, 3);
    }

    #[test]
    fn lease_is_exclusive_until_released() {
        let backend = MemoryStateBackend::new();
        let users = ResourceName::new("users");
        assert!(backend.try_acquire_lease(&cid(), &users, "a").unwrap());
        assert!(!backend.try_acquire_lease(&cid(), &users, "b").unwrap());
        backend.release_lease(&cid(), &users, "b").unwrap();
        assert!(!backend.try_acquire_lease(&cid(), &users, "b").unwrap());
        backend.release_lease(&cid(), &users, "a").unwrap();
        assert!(backend.try_acquire_lease(&cid(), &users, "b").unwrap());
    }

    #[test]
    fn renew_only_succeeds_for_the_holder() {
        let backend = MemoryStateBackend::new();
        let users = ResourceName::new("users");
        assert!(!backend.renew_lease(&cid(), &users, "a").unwrap());
        assert!(backend.try_acquire_lease(&cid(), &users, "a").unwrap());
        assert!(backend.renew_lease(&cid(), &users, "a").unwrap());
        assert!(!backend.renew_lease(&cid(), &users, "b").unwrap());
    }
}
