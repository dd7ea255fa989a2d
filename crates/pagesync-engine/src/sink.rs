//! Sink capability: the durability boundary of a sync run.

use async_trait::async_trait;
use pagesync_types::error::ConnectorError;
use pagesync_types::record::TypedRow;
use pagesync_types::schema::Resource;

use crate::context::RequestContext;

/// Confirmation that a batch is durably stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchAck {
    pub rows_written: u64,
}

/// Destination for typed rows.
///
/// `write_batch` must not return until the rows are durable; the caller
/// persists the cursor covering them only after it returns `Ok`. Rows of
/// an append resource whose primary key is already present replace the
/// stored row.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Whether the destination for `resource` currently holds no rows.
    async fn is_empty(&self, ctx: &RequestContext, resource: &Resource) -> Result<bool, ConnectorError>;

    /// Remove every row of the destination for `resource`.
    async fn truncate(&self, ctx: &RequestContext, resource: &Resource) -> Result<(), ConnectorError>;

    /// Write rows in order and confirm acceptance.
    async fn write_batch(
        &self,
        ctx: &RequestContext,
        resource: &Resource,
        rows: &[TypedRow],
    ) -> Result<BatchAck, ConnectorError>;
}
