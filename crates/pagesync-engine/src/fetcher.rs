//! Page Fetcher: bounded, cancellable retry around a [`PageSource`].
//!
//! Retry is an explicit loop with attempt counters:
//! - `rate_limit` waits at least the upstream's `retry_after` and re-asks
//!   for the same page. These waits do not consume transient attempts but
//!   are bounded by `max_rate_limit_waits`.
//! - other retryable errors back off exponentially with jitter, up to
//!   `max_attempts` total attempts.
//! - everything else (including `auth`) is returned immediately.
//!
//! Every wait races the request's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use pagesync_types::error::{ConnectorError, ErrorCategory};
use pagesync_types::schema::Resource;
use rand::Rng;

use crate::context::RequestContext;
use crate::errors::compute_backoff;
use crate::source::{Page, PageRequest, PageSource};

/// Retry bounds and delays.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts for transient failures, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each computed delay randomized in either direction.
    pub jitter: f64,
    pub max_rate_limit_waits: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(60_000),
            jitter: 0.0,
            max_rate_limit_waits: 10,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (1-based) after `err`.
    fn delay_for(&self, err: &ConnectorError, attempt: u32) -> Duration {
        let computed = compute_backoff(err, attempt, self);
        let jittered = if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            computed.mul_f64((1.0 + spread).max(0.0))
        } else {
            computed
        };
        match err.retry_after_ms {
            Some(ms) => jittered.max(Duration::from_millis(ms)),
            None => jittered,
        }
    }
}

/// Fetches pages with retry.
#[derive(Clone)]
pub struct PageFetcher {
    source: Arc<dyn PageSource>,
    policy: RetryPolicy,
}

impl PageFetcher {
    #[must_use]
    pub fn new(source: Arc<dyn PageSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub(crate) fn source(&self) -> Arc<dyn PageSource> {
        Arc::clone(&self.source)
    }

    /// Fetch one page, retrying per policy. The request is identical on
    /// every attempt.
    ///
    /// # Errors
    ///
    /// Returns the last upstream error once retries are exhausted, the
    /// first non-retryable error, or `cancelled` if the context is
    /// cancelled before a page arrives.
    pub async fn fetch(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        request: &PageRequest,
    ) -> Result<Page, ConnectorError> {
        let mut attempts = 0u32;
        let mut rate_limit_waits = 0u32;

        loop {
            if ctx.is_cancelled() {
                return Err(ConnectorError::cancelled("sync cancelled before page fetch"));
            }
            attempts += 1;

            let err = match self.source.next_page(ctx, resource, request).await {
                Ok(page) => {
                    if attempts > 1 || rate_limit_waits > 0 {
                        tracing::info!(
                            resource = resource.name(),
                            attempts,
                            rate_limit_waits,
                            "Page fetched after retry"
                        );
                    }
                    return Ok(page);
                }
                Err(err) => err,
            };

            let delay = if err.category == ErrorCategory::RateLimit {
                attempts -= 1;
                rate_limit_waits += 1;
                if rate_limit_waits > self.policy.max_rate_limit_waits {
                    tracing::error!(
                        resource = resource.name(),
                        rate_limit_waits,
                        code = %err.code,
                        "Rate limit waits exhausted"
                    );
                    return Err(err.with_details(serde_json::json!({
                        "rate_limit_waits": rate_limit_waits - 1,
                    })));
                }
                self.policy.delay_for(&err, rate_limit_waits)
            } else if err.retryable && attempts < self.policy.max_attempts {
                self.policy.delay_for(&err, attempts)
            } else {
                if err.retryable {
                    tracing::error!(
                        resource = resource.name(),
                        attempts,
                        category = %err.category,
                        code = %err.code,
                        "Max attempts exhausted, failing resource"
                    );
                    return Err(err.with_details(serde_json::json!({ "attempts": attempts })));
                }
                tracing::error!(
                    resource = resource.name(),
                    category = %err.category,
                    code = %err.code,
                    "Non-retryable fetch error"
                );
                return Err(err);
            };

            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            tracing::warn!(
                resource = resource.name(),
                attempts,
                rate_limit_waits,
                delay_ms,
                category = %err.category,
                code = %err.code,
                "Retryable fetch error, will retry"
            );
            sleep_or_cancel(ctx, delay).await?;
        }
    }
}

/// Sleep for `delay` unless the context is cancelled first.
///
/// # Errors
///
/// Returns `cancelled` if the token fires during the wait.
pub async fn sleep_or_cancel(ctx: &RequestContext, delay: Duration) -> Result<(), ConnectorError> {
    tokio::select! {
        () = ctx.cancel.cancelled() => Err(ConnectorError::cancelled("sync cancelled during backoff")),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
