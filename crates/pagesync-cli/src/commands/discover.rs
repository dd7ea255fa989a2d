use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use super::load_config;

/// Execute the `discover` command: print the declared schemas.
pub fn execute(config_path: &Path, json: bool) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let registry = config.registry()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&registry.discovery())?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Declared {} resource(s):\n", registry.len());
    for resource in registry.resources() {
        println!("Resource: {}", resource.name());
        println!("  Write mode:  {}", resource.write_mode.as_str());
        println!("  Sink:        {}", resource.sink);
        if let Some(cursor) = &resource.cursor_field {
            println!("  Cursor:      {cursor}");
        }
        println!("  Primary key: {}", resource.schema.primary_key().join(", "));
        println!("  Fields:");
        for field in &resource.schema.fields {
            let required = if field.is_required() { "REQUIRED" } else { "NULLABLE" };
            println!("    - {} ({}, {})", field.name, field.field_type, required);
        }
        println!();
    }
    Ok(ExitCode::SUCCESS)
}
