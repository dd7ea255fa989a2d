use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use super::{build_adapter, load_config};

/// Execute the `validate` command: parse, validate and wire the config
/// without contacting the source.
pub fn execute(config_path: &Path) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    println!("Connector config:  OK");

    let adapter = build_adapter(&config)?;
    println!("Source and sink:   OK");
    println!(
        "\nConnector '{}' declares {} resource(s).",
        config.connector,
        adapter.registry().len()
    );
    Ok(ExitCode::SUCCESS)
}
