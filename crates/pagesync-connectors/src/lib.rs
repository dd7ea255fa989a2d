//! Concrete page sources and sinks for the pagesync engine.

pub mod http;
pub mod jsonl;
pub mod memory;
mod table;

use std::sync::Arc;

use anyhow::{Context, Result};
use pagesync_engine::config::{ConnectorConfig, SinkKind};
use pagesync_engine::{PageSource, Sink};

pub use http::{HttpPageSource, HttpSourceConfig};
pub use jsonl::JsonlSink;
pub use memory::MemorySink;

/// Build the page source described by `config.source`.
///
/// # Errors
///
/// Returns an error if the source settings are invalid.
pub fn build_source(config: &ConnectorConfig) -> Result<Arc<dyn PageSource>> {
    let settings = HttpSourceConfig::from_value(&config.source)?;
    tracing::debug!(
        base_url = %settings.base_url,
        page_size = settings.page_size,
        "HTTP source configured"
    );
    Ok(Arc::new(HttpPageSource::new(settings)?))
}

/// Build the sink described by `config.sink`.
///
/// # Errors
///
/// Returns an error if a JSON-lines sink has no usable directory.
pub fn build_sink(config: &ConnectorConfig) -> Result<Arc<dyn Sink>> {
    match config.sink.kind {
        SinkKind::Memory => Ok(Arc::new(MemorySink::new())),
        SinkKind::Jsonl => {
            let dir = config
                .sink
                .path
                .as_ref()
                .context("sink kind 'jsonl' requires a path")?;
            let sink = JsonlSink::new(dir)
                .with_context(|| format!("Failed to create sink directory {}", dir.display()))?;
            Ok(Arc::new(sink))
        }
    }
}
