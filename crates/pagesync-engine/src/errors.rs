//! Sync error model and retry backoff policy helpers.

use std::time::Duration;

use pagesync_types::error::{BackoffClass, ConnectorError};

use crate::fetcher::RetryPolicy;

/// Multiplier applied to the policy base delay for each backoff class.
const FAST_DIVISOR: u32 = 10;
const SLOW_MULTIPLIER: u32 = 5;

// ---------------------------------------------------------------------------
// SyncError: categorised errors for retry decisions
// ---------------------------------------------------------------------------

/// Categorized sync error.
///
/// `Connector` wraps a typed `ConnectorError` with retry metadata
/// (`retryable`, `backoff_class`, `retry_after_ms`, etc.).
///
/// `Infrastructure` wraps opaque host-side errors (config loading, task
/// join failures, state backend setup) that are never retryable.
#[derive(Debug)]
pub enum SyncError {
    /// Typed connector error with retry metadata.
    Connector(ConnectorError),
    /// Infrastructure error.
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connector(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<anyhow::Error> for SyncError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<ConnectorError> for SyncError {
    fn from(e: ConnectorError) -> Self {
        Self::Connector(e)
    }
}

impl SyncError {
    /// Returns `true` if this is a typed connector error marked retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connector(e) => e.retryable,
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns `true` if the whole request must stop (credentials rejected).
    #[must_use]
    pub fn is_request_fatal(&self) -> bool {
        match self {
            Self::Connector(e) => e.is_request_fatal(),
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed connector error if this is a `Connector` variant.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Connector(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }

    /// Flatten into a connector error for reporting in a run summary.
    #[must_use]
    pub fn into_connector_error(self) -> ConnectorError {
        match self {
            Self::Connector(e) => e,
            Self::Infrastructure(e) => ConnectorError::internal("INFRASTRUCTURE", format!("{e:#}")),
        }
    }
}

/// Compute retry delay from error hints, attempt number and policy.
///
/// Exponential in `attempt` (1-based), scaled by the error's backoff class
/// and capped at `policy.max_delay`. A `retry_after_ms` hint is a floor:
/// the result is never shorter than the upstream asked for.
pub(crate) fn compute_backoff(err: &ConnectorError, attempt: u32, policy: &RetryPolicy) -> Duration {
    let base = match err.backoff_class {
        BackoffClass::Fast => policy.base_delay / FAST_DIVISOR,
        BackoffClass::Normal => policy.base_delay,
        BackoffClass::Slow => policy.base_delay * SLOW_MULTIPLIER,
    };

    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    let delay = base.saturating_mul(factor).min(policy.max_delay);

    match err.retry_after_ms {
        Some(ms) => delay.max(Duration::from_millis(ms)),
        None => delay,
    }
}
