use std::io::Read;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use pagesync_types::protocol::Request;

use super::{build_adapter, cancel_on_ctrl_c, exit_code, load_config, EXIT_INVALID};

/// Execute the `invoke` command: one request document in, one response
/// document out on stdout.
pub async fn execute(config_path: &Path, request_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let adapter = build_adapter(&config)?;

    let input = read_request(request_path)?;
    let request = match Request::parse(&input) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(error = %e, "Rejected malformed request");
            println!("{}", serde_json::json!({ "error": e.to_string() }));
            return Ok(ExitCode::from(EXIT_INVALID));
        }
    };

    let handled = adapter.handle(request, cancel_on_ctrl_c()).await?;
    println!("{}", handled.response.to_json()?);
    Ok(exit_code(handled.aborted_before_progress))
}

fn read_request(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request: {}", path.display())),
        _ => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read request from stdin")?;
            Ok(input)
        }
    }
}
