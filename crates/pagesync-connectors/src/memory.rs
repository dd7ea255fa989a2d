//! In-process sink for dry runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use pagesync_engine::{BatchAck, RequestContext, Sink};
use pagesync_types::error::ConnectorError;
use pagesync_types::record::TypedRow;
use pagesync_types::schema::Resource;
use tokio::sync::Mutex;

use crate::table::Table;

/// Keeps every destination as an ordered primary-key table in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored rows of `sink`, in first-insertion order.
    pub async fn rows(&self, sink: &str) -> Vec<serde_json::Value> {
        self.tables
            .lock()
            .await
            .get(sink)
            .map(|table| table.rows().cloned().collect())
            .unwrap_or_default()
    }

    /// Destination names that hold at least one row, sorted.
    pub async fn sinks(&self) -> Vec<String> {
        let tables = self.tables.lock().await;
        let mut names: Vec<String> = tables
            .iter()
            .filter(|(_, table)| !table.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn is_empty(&self, _ctx: &RequestContext, resource: &Resource) -> Result<bool, ConnectorError> {
        Ok(self
            .tables
            .lock()
            .await
            .get(&resource.sink)
            .map_or(true, Table::is_empty))
    }

    async fn truncate(&self, _ctx: &RequestContext, resource: &Resource) -> Result<(), ConnectorError> {
        self.tables.lock().await.remove(&resource.sink);
        Ok(())
    }

    async fn write_batch(
        &self,
        _ctx: &RequestContext,
        resource: &Resource,
        rows: &[TypedRow],
    ) -> Result<BatchAck, ConnectorError> {
        let mut tables = self.tables.lock().await;
        tables.entry(resource.sink.clone()).or_default().upsert(resource, rows);
        Ok(BatchAck {
            rows_written: rows.len() as u64,
        })
    }
}
