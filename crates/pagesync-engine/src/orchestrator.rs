//! Sync Orchestrator: the fetch → map → emit → checkpoint loop.
//!
//! Each resource runs as its own state machine:
//!
//! ```text
//! Idle -> Fetching -> Mapping -> Emitting -> Checkpointing -> (Fetching | Complete | Failed)
//! ```
//!
//! Checkpointing only happens after the sink confirmed the page's rows and
//! the run still holds its lease. Resources run concurrently under a semaphore; an auth failure in any of
//! them cancels the others.

use std::sync::Arc;

use pagesync_state::{RunLease, StateBackend, StateError, LEASE_RENEW_INTERVAL};
use pagesync_types::error::ConnectorError;
use pagesync_types::record::TypedRow;
use pagesync_types::schema::Resource;
use pagesync_types::state::{ConnectorId, CursorState, ResourceName, RunStatus, SyncRun};
use pagesync_types::wire::WriteMode;
use tokio::task::JoinSet;

use crate::checkpoint::{commit_checkpoint, Emission};
use crate::context::RequestContext;
use crate::cursor::CursorTracker;
use crate::errors::SyncError;
use crate::fetcher::{PageFetcher, RetryPolicy};
use crate::mapper::map_page;
use crate::registry::SchemaRegistry;
use crate::sink::Sink;
use crate::source::{PageRequest, PageSource};

/// Default number of resources synced at once.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Position of a resource in its sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching,
    Mapping,
    Emitting,
    Checkpointing,
    Complete,
    Failed,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Mapping => "mapping",
            Self::Emitting => "emitting",
            Self::Checkpointing => "checkpointing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(resource: &ResourceName, phase: Phase) {
    tracing::debug!(resource = %resource, phase = %phase, "Phase transition");
}

/// Result of syncing every declared resource.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// One run per declared resource, in declaration order.
    pub runs: Vec<SyncRun>,
    /// Request-fatal error that stopped the invocation, if any.
    pub aborted: Option<ConnectorError>,
}

impl SyncOutcome {
    /// Whether any resource emitted rows or moved its cursor.
    #[must_use]
    pub fn made_progress(&self) -> bool {
        self.runs
            .iter()
            .any(|r| r.rows_emitted > 0 || r.end_cursor.cursor != r.start_cursor.cursor)
    }

    #[must_use]
    pub fn failed(&self) -> impl Iterator<Item = &SyncRun> {
        self.runs.iter().filter(|r| r.status == RunStatus::Failed)
    }
}

/// Drives sync runs for the resources of one registry.
#[derive(Clone)]
pub struct SyncOrchestrator {
    registry: Arc<SchemaRegistry>,
    fetcher: PageFetcher,
    sink: Arc<dyn Sink>,
    state: Arc<dyn StateBackend>,
    connector: ConnectorId,
    max_parallel: usize,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<SchemaRegistry>,
        source: Arc<dyn PageSource>,
        sink: Arc<dyn Sink>,
        state: Arc<dyn StateBackend>,
        connector: ConnectorId,
    ) -> Self {
        Self {
            registry,
            fetcher: PageFetcher::new(source, RetryPolicy::default()),
            sink,
            state,
            connector,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.fetcher = PageFetcher::new(self.fetcher.source(), policy);
        self
    }

    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    #[must_use]
    pub fn connector(&self) -> &ConnectorId {
        &self.connector
    }

    #[must_use]
    pub fn state(&self) -> &Arc<dyn StateBackend> {
        &self.state
    }

    /// Sync every declared resource, at most `max_parallel` at a time.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Infrastructure` if a resource task panicked.
    /// Resource failures are reported in the outcome, not as errors.
    pub async fn run_all(&self, ctx: &RequestContext) -> Result<SyncOutcome, SyncError> {
        let run_ctx = ctx.child();
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_parallel));
        let mut join_set: JoinSet<(usize, SyncRun)> = JoinSet::new();

        for (index, resource) in self.registry.resources().enumerate() {
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                SyncError::Infrastructure(anyhow::anyhow!("Semaphore closed: {e}"))
            })?;
            let orchestrator = self.clone();
            let resource = resource.clone();
            let task_ctx = run_ctx.clone();

            join_set.spawn(async move {
                let run = orchestrator.run_resource(&task_ctx, &resource).await;
                if run.error.as_ref().is_some_and(ConnectorError::is_request_fatal) {
                    task_ctx.cancel.cancel();
                }
                drop(permit);
                (index, run)
            });
        }

        let (mut indexed, aborted) = collect_resource_runs(join_set, &run_ctx).await?;
        indexed.sort_by_key(|(index, _)| *index);

        Ok(SyncOutcome {
            runs: indexed.into_iter().map(|(_, run)| run).collect(),
            aborted,
        })
    }

    /// Sync one resource from its last checkpoint.
    ///
    /// Never fails as a whole: every error ends up in the returned run.
    pub async fn run_resource(&self, ctx: &RequestContext, resource: &Resource) -> SyncRun {
        let name = ResourceName::new(resource.name());
        enter(&name, Phase::Idle);

        let lease = match RunLease::acquire(Arc::clone(&self.state), &self.connector, &name) {
            Ok(lease) => lease,
            Err(e) => {
                let err = lease_error(&name, e);
                tracing::error!(resource = %name, error = %err, "Cannot start sync run");
                return SyncRun::start(name, CursorState::initial()).fail(err);
            }
        };

        let start = match self.load_cursor(&name) {
            Ok(start) => start,
            Err(err) => {
                tracing::error!(resource = %name, error = %err, "Cannot load cursor state");
                return SyncRun::start(name, CursorState::initial()).fail(err);
            }
        };

        let run_id = match self.state.start_run(&self.connector, &name) {
            Ok(id) => id,
            Err(e) => {
                let err = ConnectorError::persistence(
                    "RUN_HISTORY_FAILED",
                    format!("cannot record run start: {e}"),
                );
                return SyncRun::start(name, start).fail(err);
            }
        };

        tracing::info!(
            resource = %name,
            run_id,
            cursor = start.cursor.as_deref(),
            page_token = start.page_token.as_deref(),
            write_mode = %resource.write_mode,
            "Starting resource sync"
        );

        let mut run = SyncRun::start(name.clone(), start);
        let result = tokio::select! {
            result = self.drive(ctx, resource, &mut run, &lease) => result,
            err = keep_alive(&lease) => Err(err),
        };
        let run = match result {
            Ok(()) => {
                enter(&name, Phase::Complete);
                run.complete()
            }
            Err(err) => {
                enter(&name, Phase::Failed);
                tracing::error!(
                    resource = %name,
                    category = %err.category,
                    code = %err.code,
                    error = %err.message,
                    "Resource sync failed"
                );
                run.fail(err)
            }
        };

        self.record_history(run_id, &run);

        tracing::info!(
            resource = %name,
            status = %run.status,
            pages = run.pages,
            rows_emitted = run.rows_emitted,
            rows_rejected = run.rows_rejected,
            rows_skipped = run.rows_skipped,
            cursor = run.end_cursor.cursor.as_deref(),
            "Resource sync finished"
        );
        run
    }

    fn load_cursor(&self, name: &ResourceName) -> Result<CursorState, ConnectorError> {
        let stored = self.state.get_cursor(&self.connector, name).map_err(|e| {
            ConnectorError::persistence("STATE_UNAVAILABLE", format!("cannot read cursor: {e}"))
        })?;
        match stored {
            None => Ok(CursorState::initial()),
            Some(value) => CursorState::from_value(value),
        }
    }

    fn record_history(&self, run_id: i64, run: &SyncRun) {
        if let Err(e) = self.state.complete_run(run_id, run) {
            tracing::warn!(resource = %run.resource, run_id, error = %e, "Failed to record run result");
        }
        if run.rejections.is_empty() {
            return;
        }
        match self
            .state
            .insert_rejections(&self.connector, run_id, &run.resource, &run.rejections)
        {
            Ok(n) => tracing::debug!(resource = %run.resource, run_id, rejections = n, "Rejected rows recorded"),
            Err(e) => tracing::warn!(resource = %run.resource, run_id, error = %e, "Failed to record rejected rows"),
        }
    }

    /// The page loop. Counters accumulate in `run` whether or not it
    /// finishes.
    async fn drive(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        run: &mut SyncRun,
        lease: &RunLease,
    ) -> Result<(), ConnectorError> {
        let start = run.start_cursor.clone();
        let resuming = start.page_token.is_some();
        let mut tracker = resource.cursor_field.as_deref().map(|field| {
            CursorTracker::new(field, start.cursor.as_deref())
                .with_high_water(start.high_water.as_deref().filter(|_| resuming))
        });

        if resource.write_mode == WriteMode::ReplaceIfEmpty && !resuming {
            if !self.sink.is_empty(ctx, resource).await? {
                return Err(ConnectorError::sink(
                    "DESTINATION_NOT_EMPTY",
                    format!(
                        "resource '{}' uses replace_if_empty but its destination '{}' already holds rows",
                        resource.name(),
                        resource.sink
                    ),
                ));
            }
        }
        let mut truncate_pending = resource.write_mode.truncates_on_first_batch() && !resuming;

        let mut request = PageRequest {
            cursor: start.cursor.clone(),
            page_token: start.page_token.clone(),
        };

        loop {
            if ctx.is_cancelled() {
                return Err(ConnectorError::cancelled("sync cancelled between pages"));
            }

            enter(&run.resource, Phase::Fetching);
            let page = self.fetcher.fetch(ctx, resource, &request).await?;
            run.pages += 1;

            if page.has_more
                && (page.next_cursor.is_none() || page.next_cursor == request.page_token)
            {
                return Err(ConnectorError::schema(
                    "PAGINATION_STALLED",
                    "source reported more pages without a new continuation token",
                ));
            }

            enter(&run.resource, Phase::Mapping);
            let mapped = map_page(&page.records, &resource.schema);
            let rejected = mapped.rejections.len();
            run.record_rejections(mapped.rejections);
            if rejected > 0 && mapped.accepted == 0 {
                return Err(ConnectorError::schema(
                    "PAGE_FULLY_REJECTED",
                    format!(
                        "all {rejected} records of a page failed validation against resource '{}'",
                        resource.name()
                    ),
                )
                .with_details(serde_json::json!({ "rejected": rejected })));
            }

            let rows: Vec<TypedRow> = match tracker.as_ref() {
                Some(tracker) => {
                    let before = mapped.rows.len();
                    let fresh: Vec<TypedRow> =
                        mapped.rows.into_iter().filter(|row| tracker.is_new(row)).collect();
                    run.rows_skipped += (before - fresh.len()) as u64;
                    fresh
                }
                None => mapped.rows,
            };

            enter(&run.resource, Phase::Emitting);
            let emission = if rows.is_empty() {
                Emission::Nothing
            } else {
                if truncate_pending {
                    self.sink.truncate(ctx, resource).await?;
                    truncate_pending = false;
                    tracing::info!(resource = %run.resource, sink = %resource.sink, "Destination truncated for replace");
                }
                let ack = self.sink.write_batch(ctx, resource, &rows).await?;
                let expected = rows.len() as u64;
                if ack.rows_written >= expected {
                    run.rows_emitted += expected;
                    if let Some(tracker) = tracker.as_mut() {
                        rows.iter().for_each(|row| tracker.observe(row));
                    }
                }
                Emission::Acknowledged { ack, expected }
            };

            enter(&run.resource, Phase::Checkpointing);
            lease.renew().map_err(|e| lease_error(&run.resource, e))?;
            let next = if page.has_more {
                CursorState {
                    page_token: page.next_cursor.clone(),
                    high_water: tracker
                        .as_ref()
                        .and_then(CursorTracker::high_water)
                        .map(str::to_string),
                    checkpointed_at: None,
                    ..start.clone()
                }
            } else {
                let cursor = match &tracker {
                    Some(tracker) => tracker.high_water().map(str::to_string),
                    None => page.next_cursor.clone(),
                };
                CursorState {
                    cursor: cursor.or_else(|| start.cursor.clone()),
                    page_token: None,
                    high_water: None,
                    checkpointed_at: None,
                    ..start.clone()
                }
            };
            run.end_cursor =
                commit_checkpoint(self.state.as_ref(), &self.connector, &run.resource, emission, next)?;

            if !page.has_more {
                return Ok(());
            }
            request = PageRequest {
                cursor: start.cursor.clone(),
                page_token: run.end_cursor.page_token.clone(),
            };
        }
    }
}

fn lease_error(resource: &ResourceName, err: StateError) -> ConnectorError {
    match err {
        StateError::RunAlreadyInProgress(_) => ConnectorError::run_already_in_progress(resource.as_str()),
        StateError::LeaseLost(_) => ConnectorError::persistence(
            "LEASE_LOST",
            format!("run lease for '{resource}' was reclaimed; stopping before the next checkpoint"),
        ),
        other => ConnectorError::persistence("STATE_UNAVAILABLE", format!("run lease unavailable: {other}")),
    }
}

/// Renew `lease` every [`LEASE_RENEW_INTERVAL`]. Only returns once the
/// lease is lost or cannot be refreshed.
async fn keep_alive(lease: &RunLease) -> ConnectorError {
    let start = tokio::time::Instant::now() + LEASE_RENEW_INTERVAL;
    let mut ticks = tokio::time::interval_at(start, LEASE_RENEW_INTERVAL);
    loop {
        ticks.tick().await;
        if let Err(e) = lease.renew() {
            return lease_error(lease.resource(), e);
        }
        tracing::trace!(resource = %lease.resource(), "Run lease renewed");
    }
}

/// Collect finished resource runs. The first request-fatal error is
/// remembered and cancels every sibling through `ctx`.
async fn collect_resource_runs(
    mut join_set: JoinSet<(usize, SyncRun)>,
    ctx: &RequestContext,
) -> Result<(Vec<(usize, SyncRun)>, Option<ConnectorError>), SyncError> {
    let mut runs = Vec::new();
    let mut aborted: Option<ConnectorError> = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, run)) => {
                if let Some(err) = run.error.as_ref().filter(|e| e.is_request_fatal()) {
                    if aborted.is_none() {
                        tracing::error!(
                            resource = %run.resource,
                            code = %err.code,
                            "Request-fatal error, cancelling remaining resources"
                        );
                        aborted = Some(err.clone());
                        ctx.cancel.cancel();
                    }
                }
                runs.push((index, run));
            }
            Err(join_err) => {
                join_set.abort_all();
                return Err(SyncError::Infrastructure(anyhow::anyhow!(
                    "Resource task panicked: {join_err}"
                )));
            }
        }
    }

    Ok((runs, aborted))
}
