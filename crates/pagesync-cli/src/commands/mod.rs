pub mod discover;
pub mod history;
pub mod invoke;
pub mod run;
pub mod validate;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use pagesync_engine::config::{self, ConnectorConfig};
use pagesync_engine::ProtocolAdapter;
use tokio_util::sync::CancellationToken;

/// Request unreadable or configuration invalid.
pub const EXIT_INVALID: u8 = 1;
/// Sync aborted by rejected credentials before any resource progressed.
pub const EXIT_ABORTED: u8 = 2;

/// Parse and validate a connector config file.
pub fn load_config(path: &Path) -> Result<ConnectorConfig> {
    let config = config::parse_config(path)?;
    config::validate_config(&config)?;
    Ok(config)
}

/// Wire the configured source and sink into a protocol adapter.
pub fn build_adapter(config: &ConnectorConfig) -> Result<ProtocolAdapter> {
    let registry = config.registry()?;
    let source = pagesync_connectors::build_source(config)?;
    let sink = pagesync_connectors::build_sink(config)?;
    Ok(
        ProtocolAdapter::new(Arc::new(registry), source, sink, config.connector_id())
            .with_retry_policy(config.retry_policy())
            .with_max_parallel(config.concurrency.max_parallel_resources),
    )
}

/// Token cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

pub fn exit_code(aborted_before_progress: bool) -> ExitCode {
    if aborted_before_progress {
        ExitCode::from(EXIT_ABORTED)
    } else {
        ExitCode::SUCCESS
    }
}
