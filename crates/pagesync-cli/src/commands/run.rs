use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use pagesync_engine::config::{ConnectorConfig, StateBackendKind};
use pagesync_engine::RequestContext;
use pagesync_state::{MemoryStateBackend, SqliteStateBackend, StateBackend};
use pagesync_types::protocol::Secrets;

use super::{build_adapter, cancel_on_ctrl_c, exit_code, load_config};

/// Execute the `run` command: sync every resource against the configured
/// state backend and print a summary.
pub async fn execute(config_path: &Path, secrets_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let adapter = build_adapter(&config)?;
    let backend = open_backend(&config)?;
    let secrets = read_secrets(secrets_path)?;

    tracing::info!(
        connector = config.connector,
        resources = config.resources.len(),
        backend = ?config.state.backend,
        "Connector config validated"
    );

    let ctx = RequestContext::new(secrets, cancel_on_ctrl_c());
    let (response, outcome) = adapter.sync_with_backend(&ctx, backend).await?;

    println!("Sync '{}' finished.", config.connector);
    for run in &response.runs {
        println!(
            "  {:20} {:9} emitted={} rejected={} skipped={}",
            run.resource,
            run.status.as_str(),
            run.rows_emitted,
            run.rows_rejected,
            run.rows_skipped
        );
        if let Some(error) = &run.error {
            println!("    {error}");
        }
    }
    if let Some(error) = &response.error {
        println!("  Aborted: {error}");
    }

    Ok(exit_code(outcome.aborted.is_some() && !outcome.made_progress()))
}

pub(crate) fn open_backend(config: &ConnectorConfig) -> Result<Arc<dyn StateBackend>> {
    match config.state.backend {
        StateBackendKind::Memory => {
            tracing::warn!("State backend is 'memory'; cursors are discarded when the run ends");
            Ok(Arc::new(MemoryStateBackend::new()))
        }
        StateBackendKind::Sqlite => {
            let path = config
                .state
                .path
                .as_ref()
                .context("state backend 'sqlite' requires a path")?;
            let backend = SqliteStateBackend::open(path)
                .with_context(|| format!("Failed to open state database {}", path.display()))?;
            Ok(Arc::new(backend))
        }
    }
}

fn read_secrets(path: Option<&Path>) -> Result<Secrets> {
    let Some(path) = path else {
        return Ok(Secrets::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read secrets: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Secrets file {} must be a JSON object", path.display()))
}
