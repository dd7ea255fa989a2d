//! Scripted sources, sinks and state backends for engine tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pagesync_engine::{BatchAck, Page, PageRequest, PageSource, RequestContext, Sink};
use pagesync_state::{MemoryStateBackend, RunRecord, StateBackend, StateError};
use pagesync_types::error::ConnectorError;
use pagesync_types::protocol::StateDocument;
use pagesync_types::record::{key_from_json, RawRecord, Rejection, TypedRow};
use pagesync_types::schema::{FieldSchema, FieldType, Resource, Schema};
use pagesync_types::state::{ConnectorId, CursorState, ResourceName, SyncRun};
use tokio::time::Instant;

/// Shared, ordered log of sink and state events.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("record must be an object, got {other}"),
    }
}

pub fn users_resource() -> Resource {
    Resource::new(Schema::new(
        "users",
        vec![
            FieldSchema::new("user_id", FieldType::String).primary_key(),
            FieldSchema::new("name", FieldType::String),
            FieldSchema::new("created_at", FieldType::Timestamp).required(),
        ],
    ))
    .with_cursor_field("created_at")
}

pub fn posts_resource() -> Resource {
    Resource::new(Schema::new(
        "posts",
        vec![
            FieldSchema::new("id", FieldType::String).primary_key(),
            FieldSchema::new("score", FieldType::Integer),
        ],
    ))
}

pub fn user(id: &str, created_at: &str) -> RawRecord {
    record(serde_json::json!({"user_id": id, "name": format!("user {id}"), "created_at": created_at}))
}

pub fn post(id: &str, score: i64) -> RawRecord {
    record(serde_json::json!({"id": id, "score": score}))
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Serves pages keyed by (resource, page token). Failures queued with
/// [`ScriptedSource::fail_next`] are returned before the real page.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<HashMap<(String, Option<String>), Page>>,
    failures: Mutex<HashMap<String, VecDeque<ConnectorError>>>,
    calls: Mutex<Vec<(Instant, String, PageRequest)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, resource: &str, token: Option<&str>, page: Page) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert((resource.to_string(), token.map(str::to_string)), page);
        self
    }

    pub fn fail_next(self, resource: &str, err: ConnectorError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(resource.to_string())
            .or_default()
            .push_back(err);
        self
    }

    pub fn calls(&self) -> Vec<(Instant, String, PageRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tokens_requested(&self, resource: &str) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter(|(_, r, _)| r == resource)
            .map(|(_, _, req)| req.page_token)
            .collect()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn next_page(
        &self,
        _ctx: &RequestContext,
        resource: &Resource,
        request: &PageRequest,
    ) -> Result<Page, ConnectorError> {
        let name = resource.name().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), name.clone(), request.clone()));

        if let Some(err) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&(name, request.page_token.clone()))
            .cloned()
            .unwrap_or_else(|| Page::last(Vec::new(), None)))
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Primary-key upsert sink with fault injection.
#[derive(Default)]
pub struct UpsertSink {
    tables: Mutex<HashMap<String, BTreeMap<String, serde_json::Value>>>,
    batches: Mutex<Vec<(String, usize)>>,
    truncations: Mutex<Vec<String>>,
    /// Fail the N-th batch (1-based) after storing it.
    crash_after_storing: Mutex<Option<usize>>,
    /// Acknowledge fewer rows than written.
    short_ack: Mutex<bool>,
    journal: Option<Journal>,
}

impl UpsertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    pub fn crash_after_storing_batch(self, n: usize) -> Self {
        *self.crash_after_storing.lock().unwrap() = Some(n);
        self
    }

    /// Stop crashing; stored rows are kept.
    pub fn heal(&self) {
        *self.crash_after_storing.lock().unwrap() = None;
    }

    pub fn short_ack(self) -> Self {
        *self.short_ack.lock().unwrap() = true;
        self
    }

    pub fn preload(&self, sink: &str, key: &str, row: serde_json::Value) {
        self.tables
            .lock()
            .unwrap()
            .entry(sink.to_string())
            .or_default()
            .insert(key.to_string(), row);
    }

    pub fn rows(&self, sink: &str) -> Vec<serde_json::Value> {
        self.tables
            .lock()
            .unwrap()
            .get(sink)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn truncations(&self) -> Vec<String> {
        self.truncations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for UpsertSink {
    async fn is_empty(&self, _ctx: &RequestContext, resource: &Resource) -> Result<bool, ConnectorError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&resource.sink)
            .map_or(true, BTreeMap::is_empty))
    }

    async fn truncate(&self, _ctx: &RequestContext, resource: &Resource) -> Result<(), ConnectorError> {
        self.tables.lock().unwrap().remove(&resource.sink);
        self.truncations.lock().unwrap().push(resource.sink.clone());
        Ok(())
    }

    async fn write_batch(
        &self,
        _ctx: &RequestContext,
        resource: &Resource,
        rows: &[TypedRow],
    ) -> Result<BatchAck, ConnectorError> {
        let pk = resource.schema.primary_key();
        {
            let mut tables = self.tables.lock().unwrap();
            let table = tables.entry(resource.sink.clone()).or_default();
            for row in rows {
                let json = row.to_json();
                let key = match &json {
                    serde_json::Value::Object(map) => key_from_json(map, &pk),
                    _ => unreachable!(),
                };
                table.insert(key, json);
            }
        }

        let n = {
            let mut batches = self.batches.lock().unwrap();
            batches.push((resource.sink.clone(), rows.len()));
            batches.len()
        };
        if let Some(journal) = &self.journal {
            journal
                .lock()
                .unwrap()
                .push(format!("emit:{}:{}", resource.name(), rows.len()));
        }

        if *self.crash_after_storing.lock().unwrap() == Some(n) {
            return Err(ConnectorError::sink("CRASHED", "sink crashed before acknowledging"));
        }
        let rows_written = if *self.short_ack.lock().unwrap() {
            rows.len().saturating_sub(1) as u64
        } else {
            rows.len() as u64
        };
        Ok(BatchAck { rows_written })
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Memory backend that journals checkpoints and can refuse to save.
pub struct JournaledState {
    inner: MemoryStateBackend,
    journal: Journal,
    /// Successful saves allowed before `set_cursor` starts failing.
    saves_allowed: Mutex<Option<usize>>,
    /// Report every held lease as reclaimed on renewal.
    leases_lost: Mutex<bool>,
}

impl JournaledState {
    pub fn new(connector: &ConnectorId, state: StateDocument, journal: Journal) -> Self {
        Self {
            inner: MemoryStateBackend::seeded(connector, state),
            journal,
            saves_allowed: Mutex::new(None),
            leases_lost: Mutex::new(false),
        }
    }

    pub fn lose_leases(self) -> Self {
        *self.leases_lost.lock().unwrap() = true;
        self
    }

    pub fn fail_saves_after(self, n: usize) -> Self {
        *self.saves_allowed.lock().unwrap() = Some(n);
        self
    }
}

impl StateBackend for JournaledState {
    fn get_cursor(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
    ) -> pagesync_state::error::Result<Option<serde_json::Value>> {
        self.inner.get_cursor(connector, resource)
    }

    fn set_cursor(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        cursor: &CursorState,
    ) -> pagesync_state::error::Result<()> {
        {
            let mut allowed = self.saves_allowed.lock().unwrap();
            if let Some(n) = allowed.as_mut() {
                if *n == 0 {
                    return Err(StateError::Io(std::io::Error::other("disk full")));
                }
                *n -= 1;
            }
        }
        self.inner.set_cursor(connector, resource, cursor)?;
        self.journal.lock().unwrap().push(format!(
            "checkpoint:{resource}:{}",
            cursor.page_token.as_deref().or(cursor.cursor.as_deref()).unwrap_or("-")
        ));
        Ok(())
    }

    fn export_state(&self, connector: &ConnectorId) -> pagesync_state::error::Result<StateDocument> {
        self.inner.export_state(connector)
    }

    fn start_run(&self, connector: &ConnectorId, resource: &ResourceName) -> pagesync_state::error::Result<i64> {
        self.inner.start_run(connector, resource)
    }

    fn complete_run(&self, run_id: i64, run: &SyncRun) -> pagesync_state::error::Result<()> {
        self.inner.complete_run(run_id, run)
    }

    fn list_runs(&self, connector: &ConnectorId, limit: usize) -> pagesync_state::error::Result<Vec<RunRecord>> {
        self.inner.list_runs(connector, limit)
    }

    fn insert_rejections(
        &self,
        connector: &ConnectorId,
        run_id: i64,
        resource: &ResourceName,
        rejections: &[Rejection],
    ) -> pagesync_state::error::Result<u64> {
        self.inner.insert_rejections(connector, run_id, resource, rejections)
    }

    fn try_acquire_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> pagesync_state::error::Result<bool> {
        self.inner.try_acquire_lease(connector, resource, owner)
    }

    fn renew_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> pagesync_state::error::Result<bool> {
        if *self.leases_lost.lock().unwrap() {
            return Ok(false);
        }
        self.inner.renew_lease(connector, resource, owner)
    }

    fn release_lease(
        &self,
        connector: &ConnectorId,
        resource: &ResourceName,
        owner: &str,
    ) -> pagesync_state::error::Result<()> {
        self.inner.release_lease(connector, resource, owner)
    }
}
