use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Result};
use pagesync_engine::config::StateBackendKind;

use super::load_config;
use super::run::open_backend;

/// Execute the `history` command: list recent runs, newest first.
pub fn execute(config_path: &Path, limit: usize) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    if config.state.backend != StateBackendKind::Sqlite {
        bail!("Run history requires the 'sqlite' state backend");
    }

    let backend = open_backend(&config)?;
    let runs = backend.list_runs(&config.connector_id(), limit)?;
    if runs.is_empty() {
        println!("No runs recorded for '{}'.", config.connector);
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:>6}  {:20} {:9} {:>8} {:>8} {:>8}", "ID", "RESOURCE", "STATUS", "EMITTED", "REJECTED", "SKIPPED");
    for run in runs {
        println!(
            "{:>6}  {:20} {:9} {:>8} {:>8} {:>8}",
            run.id,
            run.resource,
            run.status.as_str(),
            run.rows_emitted,
            run.rows_rejected,
            run.rows_skipped
        );
        if let Some(error) = run.error {
            println!("        {error}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
