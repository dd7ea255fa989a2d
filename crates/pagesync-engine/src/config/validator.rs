//! Semantic validation for parsed connector configuration values.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::types::{ConnectorConfig, SinkKind, StateBackendKind};

/// Validate a parsed connector configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &ConnectorConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.connector.trim().is_empty() {
        errors.push("Connector name must not be empty".to_string());
    }

    if config.resources.is_empty() {
        errors.push("At least one resource must be declared".to_string());
    }

    let mut names = HashSet::new();
    for (i, resource) in config.resources.iter().enumerate() {
        if resource.name.trim().is_empty() {
            errors.push(format!("Resource {i} has an empty name"));
            continue;
        }
        if !names.insert(resource.name.as_str()) {
            errors.push(format!("Resource '{}' is declared more than once", resource.name));
        }
        if let Err(resource_errors) = resource.to_resource().validate() {
            errors.extend(resource_errors);
        }
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        errors.push(format!("retry.jitter must be within [0, 1], got {}", retry.jitter));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        errors.push(format!(
            "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
            retry.base_delay_ms, retry.max_delay_ms
        ));
    }

    if config.concurrency.max_parallel_resources == 0 {
        errors.push("concurrency.max_parallel_resources must be at least 1".to_string());
    }

    if config.sink.kind == SinkKind::Jsonl && config.sink.path.is_none() {
        errors.push("sink kind 'jsonl' requires a path".to_string());
    }

    if config.state.backend == StateBackendKind::Sqlite && config.state.path.is_none() {
        errors.push("state backend 'sqlite' requires a path".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Connector config validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
connector: test_connector
resources:
  - name: users
    cursor_field: created_at
    fields:
      - { name: user_id, type: STRING, primary_key: true }
      - { name: created_at, type: TIMESTAMP }
"#
    }

    fn validate(yaml: &str) -> Result<()> {
        validate_config(&parse_config_str(yaml).unwrap())
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(valid_yaml()).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let err = validate(&valid_yaml().replace("\"1.0\"", "\"2.0\"")).unwrap_err().to_string();
        assert!(err.contains("Unsupported config version"));
    }

    #[test]
    fn test_empty_connector_name_fails() {
        let err = validate(&valid_yaml().replace("test_connector", "\"\""))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Connector name must not be empty"));
    }

    #[test]
    fn test_missing_primary_key_fails() {
        let err = validate(&valid_yaml().replace(", primary_key: true", ""))
            .unwrap_err()
            .to_string();
        assert!(err.contains("primary key"));
    }

    #[test]
    fn test_boolean_cursor_field_fails() {
        let err = validate(&valid_yaml().replace("TIMESTAMP", "BOOLEAN"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("unorderable"));
    }

    #[test]
    fn test_duplicate_resource_names_fail() {
        let yaml = r#"
version: "1.0"
connector: dup
resources:
  - name: users
    fields:
      - { name: id, type: INTEGER, primary_key: true }
  - name: users
    fields:
      - { name: id, type: INTEGER, primary_key: true }
"#;
        let err = validate(yaml).unwrap_err().to_string();
        assert!(err.contains("declared more than once"));
    }

    #[test]
    fn test_errors_are_accumulated() {
        let yaml = r#"
version: "0.9"
connector: bad
sink:
  kind: jsonl
resources:
  - name: users
    fields:
      - { name: id, type: INTEGER, primary_key: true }
retry:
  max_attempts: 0
  jitter: 1.5
concurrency:
  max_parallel_resources: 0
state:
  backend: sqlite
"#;
        let err = validate(yaml).unwrap_err().to_string();
        for needle in [
            "Unsupported config version",
            "max_attempts",
            "jitter",
            "max_parallel_resources",
            "'jsonl' requires a path",
            "'sqlite' requires a path",
        ] {
            assert!(err.contains(needle), "missing '{needle}' in: {err}");
        }
    }

    #[test]
    fn test_no_resources_fails() {
        let yaml = "version: \"1.0\"\nconnector: empty\nresources: []\n";
        let err = validate(yaml).unwrap_err().to_string();
        assert!(err.contains("At least one resource"));
    }
}
