//! Protocol Adapter: one request document in, one response document out.
//!
//! Holds no state across invocations. A `sync` request carries its prior
//! state; the adapter seeds an in-memory backend from it and exports the
//! backend after the run.

use std::sync::Arc;

use pagesync_state::{MemoryStateBackend, StateBackend};
use pagesync_types::protocol::{
    Request, Response, RunSummary, SchemaResponse, Secrets, StateDocument, SyncResponse,
    TestResponse,
};
use pagesync_types::state::ConnectorId;
use pagesync_types::wire::Action;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::errors::SyncError;
use crate::fetcher::RetryPolicy;
use crate::orchestrator::{SyncOrchestrator, SyncOutcome, DEFAULT_MAX_PARALLEL};
use crate::registry::SchemaRegistry;
use crate::sink::Sink;
use crate::source::PageSource;

/// Message returned by a successful `test` action.
pub const TEST_PASSED: &str = "Connection test passed";

/// A response plus what the host needs to pick an exit status.
#[derive(Debug, Clone)]
pub struct Handled {
    pub response: Response,
    /// A request-fatal error stopped the sync before any resource made
    /// progress.
    pub aborted_before_progress: bool,
}

/// Dispatches `schema`, `test` and `sync` requests.
pub struct ProtocolAdapter {
    registry: Arc<SchemaRegistry>,
    source: Arc<dyn PageSource>,
    sink: Arc<dyn Sink>,
    connector: ConnectorId,
    policy: RetryPolicy,
    max_parallel: usize,
}

impl ProtocolAdapter {
    #[must_use]
    pub fn new(
        registry: Arc<SchemaRegistry>,
        source: Arc<dyn PageSource>,
        sink: Arc<dyn Sink>,
        connector: ConnectorId,
    ) -> Self {
        Self {
            registry,
            source,
            sink,
            connector,
            policy: RetryPolicy::default(),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
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

    /// Route one decoded request.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Infrastructure` if the sync machinery itself
    /// broke (a panicked resource task or an unreadable state backend).
    pub async fn handle(&self, request: Request, cancel: CancellationToken) -> Result<Handled, SyncError> {
        tracing::info!(connector = %self.connector, action = ?request.action, "Handling request");
        match request.action {
            Action::Schema => Ok(Handled {
                response: Response::Schema(self.schema()),
                aborted_before_progress: false,
            }),
            Action::Test => Ok(Handled {
                response: Response::Test(self.test(request.secrets, cancel).await),
                aborted_before_progress: false,
            }),
            Action::Sync => {
                let (response, outcome) = self.sync(request.secrets, request.state, cancel).await?;
                Ok(Handled {
                    response: Response::Sync(response),
                    aborted_before_progress: outcome.aborted.is_some() && !outcome.made_progress(),
                })
            }
        }
    }

    /// Discovery document. No side effects.
    #[must_use]
    pub fn schema(&self) -> SchemaResponse {
        self.registry.discovery()
    }

    /// Probe the source with the supplied credentials.
    pub async fn test(&self, secrets: Secrets, cancel: CancellationToken) -> TestResponse {
        let Some(resource) = self.registry.resources().next() else {
            return TestResponse {
                success: false,
                message: Some("no resources are declared".to_string()),
            };
        };

        let ctx = RequestContext::new(secrets, cancel);
        match self.source.probe(&ctx, resource).await {
            Ok(()) => {
                tracing::info!(resource = resource.name(), "Connection test passed");
                TestResponse {
                    success: true,
                    message: Some(TEST_PASSED.to_string()),
                }
            }
            Err(err) => {
                tracing::warn!(
                    resource = resource.name(),
                    category = %err.category,
                    code = %err.code,
                    "Connection test failed"
                );
                TestResponse {
                    success: false,
                    message: Some(err.message),
                }
            }
        }
    }

    /// Sync every declared resource from the supplied prior state.
    ///
    /// State entries for resources that are not declared are carried
    /// through unchanged.
    ///
    /// # Errors
    ///
    /// See [`ProtocolAdapter::handle`].
    pub async fn sync(
        &self,
        secrets: Secrets,
        state: StateDocument,
        cancel: CancellationToken,
    ) -> Result<(SyncResponse, SyncOutcome), SyncError> {
        for name in state.keys().filter(|name| !self.registry.contains(name)) {
            tracing::warn!(resource = %name, "State for undeclared resource will be passed through unchanged");
        }

        let backend: Arc<dyn StateBackend> =
            Arc::new(MemoryStateBackend::seeded(&self.connector, state));
        let ctx = RequestContext::new(secrets, cancel);
        self.sync_with_backend(&ctx, backend).await
    }

    /// Sync against a caller-provided state backend (e.g. `SQLite`).
    ///
    /// # Errors
    ///
    /// See [`ProtocolAdapter::handle`].
    pub async fn sync_with_backend(
        &self,
        ctx: &RequestContext,
        backend: Arc<dyn StateBackend>,
    ) -> Result<(SyncResponse, SyncOutcome), SyncError> {
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            Arc::clone(&backend),
            self.connector.clone(),
        )
        .with_retry_policy(self.policy.clone())
        .with_max_parallel(self.max_parallel);

        let outcome = orchestrator.run_all(ctx).await?;

        let state = backend.export_state(&self.connector).map_err(|e| {
            SyncError::Infrastructure(anyhow::anyhow!("Failed to export state: {e}"))
        })?;

        let failed = outcome.failed().count();
        tracing::info!(
            connector = %self.connector,
            resources = outcome.runs.len(),
            failed,
            aborted = outcome.aborted.is_some(),
            "Sync finished"
        );

        let response = SyncResponse {
            state,
            runs: outcome.runs.iter().map(RunSummary::from).collect(),
            error: outcome.aborted.as_ref().map(ToString::to_string),
        };
        Ok((response, outcome))
    }
}
