//! Page source capability.

use async_trait::async_trait;
use pagesync_types::error::ConnectorError;
use pagesync_types::record::RawRecord;
use pagesync_types::schema::Resource;

use crate::context::RequestContext;

/// Position to fetch from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Durable high-water mark the run started from.
    pub cursor: Option<String>,
    /// Continuation token of the page to fetch; `None` for the first page.
    pub page_token: Option<String>,
}

/// One batch of raw records returned by a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// Continuation for the next page, or the final position when
    /// `has_more` is false.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl Page {
    #[must_use]
    pub fn last(records: Vec<RawRecord>, next_cursor: Option<String>) -> Self {
        Self {
            records,
            next_cursor,
            has_more: false,
        }
    }

    #[must_use]
    pub fn more(records: Vec<RawRecord>, next_cursor: impl Into<String>) -> Self {
        Self {
            records,
            next_cursor: Some(next_cursor.into()),
            has_more: true,
        }
    }
}

/// Upstream that returns pages of raw records for a resource.
///
/// Implementations classify failures into the `ConnectorError`
/// categories: `rate_limit` (with `retry_after_ms` when known), `auth`,
/// `upstream_unavailable` and `transient_network`. Retrying is the
/// caller's job.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn next_page(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        request: &PageRequest,
    ) -> Result<Page, ConnectorError>;

    /// Cheapest call that proves the credentials work.
    async fn probe(&self, ctx: &RequestContext, resource: &Resource) -> Result<(), ConnectorError> {
        self.next_page(ctx, resource, &PageRequest::default())
            .await
            .map(|_| ())
    }
}
